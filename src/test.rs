mod mock;
pub(crate) mod util;

pub(crate) use self::{
    mock::{FailPoint, MockRole, MockServer},
    util::{client_options, wait_for_topology, EventBuffer},
};
