mod header;
pub(crate) mod message;
#[cfg(test)]
mod test;
mod util;

pub(crate) use self::message::{DocumentSequence, Message, MessageFlags};
