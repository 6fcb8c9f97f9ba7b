pub(crate) mod conn;
pub(crate) mod establish;
mod manager;
pub(crate) mod options;
mod worker;

use std::sync::Arc;

use derive_where::derive_where;
use tokio::{sync::watch, time::Instant};

pub(crate) use self::{
    conn::{Command, Connection, ConnectionState, RawCommandResponse},
    worker::{Backoff, PoolState},
};
use self::{manager::PoolManager, options::ConnectionPoolOptions, worker::ConnectionPoolWorker};
use crate::{
    error::{Error, Result},
    options::ServerAddress,
    runtime,
    sdam::TopologyUpdater,
};

/// A handle to the task that owns the single multiplexed connection to one server. Cheap to
/// clone; the task shuts down when every handle has been dropped.
#[derive(Clone)]
#[derive_where(Debug)]
pub(crate) struct ConnectionPool {
    address: ServerAddress,
    manager: PoolManager,
    #[derive_where(skip)]
    state: watch::Receiver<PoolState>,
}

impl ConnectionPool {
    pub(crate) fn new(
        address: ServerAddress,
        server_updater: TopologyUpdater,
        options: ConnectionPoolOptions,
    ) -> Self {
        let (manager, state) = ConnectionPoolWorker::start(address.clone(), options, server_updater);
        Self {
            address,
            manager,
            state,
        }
    }

    pub(crate) fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Returns the pool's ready connection, opening it first if needed.
    ///
    /// Fails right away with the last connection error while the pool is backing off, so that the
    /// caller can reselect. Waiting for a connection to open is bounded by `deadline`.
    pub(crate) async fn check_out(&self, deadline: Option<Instant>) -> Result<Arc<Connection>> {
        let mut state = self.state.clone();
        loop {
            let current = state.borrow_and_update().clone();
            match current {
                PoolState::Ready(conn) if conn.is_usable() => return Ok(conn),
                PoolState::Ready(_) | PoolState::Idle => self.manager.connect(),
                PoolState::Connecting => {}
                PoolState::Backoff { error, .. } if error.is_configuration_error() => {
                    return Err(error)
                }
                PoolState::Backoff { error, .. } => {
                    return Err(Error::reconnect(format!(
                        "no connection to {} is available",
                        self.address
                    ))
                    .with_source(error))
                }
                PoolState::Closed => return Err(self.closed_error()),
            }

            runtime::with_deadline(deadline, state.changed())
                .await?
                .map_err(|_| self.closed_error())?;
        }
    }

    /// Fails the current connection with `cause`. The next check-out opens a new one.
    pub(crate) fn clear(&self, cause: Error) {
        self.manager.clear(cause);
    }

    /// Closes the current connection and stops the pool's task.
    pub(crate) fn close(&self) {
        self.manager.close();
    }

    pub(crate) fn state(&self) -> PoolState {
        self.state.borrow().clone()
    }

    fn closed_error(&self) -> Error {
        Error::reconnect(format!("connection pool for {} is closed", self.address))
    }
}
