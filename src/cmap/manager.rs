use tokio::sync::mpsc;

use crate::error::Error;

/// Struct used to make management requests to the pool worker. The worker shuts down once every
/// `PoolManager` has been dropped.
#[derive(Clone, Debug)]
pub(super) struct PoolManager {
    sender: mpsc::UnboundedSender<PoolManagementRequest>,
}

impl PoolManager {
    pub(super) fn new() -> (PoolManager, ManagementRequestReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, ManagementRequestReceiver { receiver })
    }

    /// Ask the worker to open a connection if it has none.
    pub(super) fn connect(&self) {
        let _ = self.sender.send(PoolManagementRequest::Connect);
    }

    /// Fail the current connection and reconnect lazily.
    pub(super) fn clear(&self, cause: Error) {
        let _ = self.sender.send(PoolManagementRequest::Clear(cause));
    }

    /// Close the current connection and stop the worker.
    pub(super) fn close(&self) {
        let _ = self.sender.send(PoolManagementRequest::Close);
    }
}

#[derive(Debug)]
pub(super) struct ManagementRequestReceiver {
    receiver: mpsc::UnboundedReceiver<PoolManagementRequest>,
}

impl ManagementRequestReceiver {
    /// Returns `Close` once every manager has been dropped.
    pub(super) async fn recv(&mut self) -> PoolManagementRequest {
        self.receiver
            .recv()
            .await
            .unwrap_or(PoolManagementRequest::Close)
    }
}

#[derive(Debug)]
pub(super) enum PoolManagementRequest {
    Connect,
    Clear(Error),
    Close,
}
