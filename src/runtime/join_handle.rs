use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// A handle used for awaiting on tasks spawned in `runtime::spawn`.
#[derive(Debug)]
pub(crate) struct AsyncJoinHandle<T>(tokio::task::JoinHandle<T>);

impl<T> AsyncJoinHandle<T> {
    pub(crate) fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        AsyncJoinHandle(tokio::runtime::Handle::current().spawn(fut))
    }

    /// Cancels the task at its next suspension point.
    pub(crate) fn abort(&self) {
        self.0.abort()
    }
}

impl<T> Future for AsyncJoinHandle<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Re-raises a panic from the task.
        Pin::new(&mut self.0).poll(cx).map(|result| result.unwrap())
    }
}
