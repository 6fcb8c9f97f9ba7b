mod description;
mod monitor;
mod server;
#[cfg(test)]
mod test;
mod topology;

pub use self::{
    description::{
        server::{ServerDescription, ServerType},
        topology::{TopologyDescription, TopologyType},
    },
    topology::TopologyWatcher,
};
pub use crate::hello::MemberStatus;

pub(crate) use self::{
    description::topology::server_selection::SelectionCriteria,
    monitor::MIN_HEARTBEAT_FREQUENCY,
    server::Server,
    topology::{Topology, TopologyState, TopologyUpdater},
};
#[cfg(test)]
pub(crate) use self::topology::UpdateMessage;
