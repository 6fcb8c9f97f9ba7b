mod acknowledged_message;
mod join_handle;
pub(crate) mod stream;
mod worker_handle;

use std::{future::Future, net::SocketAddr, time::Duration};

use tokio::time::Instant;

pub(crate) use self::{
    acknowledged_message::{AcknowledgedMessage, AcknowledgmentReceiver},
    join_handle::AsyncJoinHandle,
    worker_handle::{WorkerHandle, WorkerHandleListener},
};
use crate::{
    error::{Error, Result},
    options::ServerAddress,
};

/// Spawn a task in the background to run a future.
///
/// This must be called from an async block or function running on a runtime.
pub(crate) fn spawn<F, O>(fut: F) -> AsyncJoinHandle<O>
where
    F: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    AsyncJoinHandle::spawn(fut)
}

/// Delay for the specified duration.
pub(crate) async fn delay_for(delay: Duration) {
    tokio::time::sleep(delay).await
}

/// Await on a future for a maximum amount of time before returning an I/O timeout error.
pub(crate) async fn timeout<F: Future>(timeout: Duration, future: F) -> Result<F::Output> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| std::io::ErrorKind::TimedOut.into())
}

/// Await on a future until the operation's deadline, if it has one. Expiry is reported as
/// `TimeExceeded`.
pub(crate) async fn with_deadline<F: Future>(
    deadline: Option<Instant>,
    future: F,
) -> Result<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future)
            .await
            .map_err(|_| Error::time_exceeded("operation deadline elapsed")),
        None => Ok(future.await),
    }
}

pub(crate) async fn resolve_address(
    address: &ServerAddress,
) -> Result<impl Iterator<Item = SocketAddr>> {
    let socket_addrs = tokio::net::lookup_host(format!("{address}")).await?;
    Ok(socket_addrs)
}
