use std::sync::Arc;

use crate::{
    cmap::{options::ConnectionPoolOptions, ConnectionPool},
    options::ServerAddress,
    sdam::TopologyUpdater,
};

/// Contains the state for a given server in the topology.
#[derive(Debug)]
pub(crate) struct Server {
    pub(crate) address: ServerAddress,

    /// The pool owning the server's multiplexed connection.
    pub(crate) pool: ConnectionPool,
}

impl Server {
    /// Create a new reference counted `Server`, including its connection pool.
    pub(crate) fn new(
        address: ServerAddress,
        options: ConnectionPoolOptions,
        topology_updater: TopologyUpdater,
    ) -> Arc<Server> {
        Arc::new(Self {
            pool: ConnectionPool::new(address.clone(), topology_updater, options),
            address,
        })
    }
}
