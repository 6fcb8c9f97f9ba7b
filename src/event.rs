//! Events emitted for every command sent and every change in the observed replica set.

pub mod command;
pub mod sdam;

use std::sync::Arc;

use futures_core::future::BoxFuture;

/// Where a client delivers its events. A `tokio` channel converts into a handler directly:
///
/// ```rust
/// # use mongomux::options::ClientOptions;
/// # fn example() {
/// let (tx, mut rx) = tokio::sync::mpsc::channel(100);
/// tokio::spawn(async move {
///     while let Some(event) = rx.recv().await {
///         println!("{:?}", event);
///     }
/// });
/// let options = ClientOptions::builder()
///     .sdam_event_handler(tx.into())
///     .build();
/// # }
/// ```
///
/// Callbacks run inline on the task that produced the event, so they must not block:
///
/// ```rust
/// # use mongomux::{event::{command::CommandEvent, EventHandler}, options::ClientOptions};
/// # fn example() {
/// let options = ClientOptions::builder()
///     .command_event_handler(EventHandler::callback(|event: CommandEvent| {
///         if let CommandEvent::Failed(failed) = event {
///             eprintln!("{} failed: {}", failed.command_name, failed.failure);
///         }
///     }))
///     .build();
/// # }
/// ```
#[derive(Clone)]
#[non_exhaustive]
pub enum EventHandler<T> {
    /// A callback.
    Callback(Arc<dyn Fn(T) + Sync + Send>),
    /// An async callback.
    AsyncCallback(Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Sync + Send>),
    /// A `tokio` channel sender.
    TokioMpsc(tokio::sync::mpsc::Sender<T>),
}

impl<T> std::fmt::Debug for EventHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EventHandler").finish()
    }
}

impl<T> From<tokio::sync::mpsc::Sender<T>> for EventHandler<T> {
    fn from(value: tokio::sync::mpsc::Sender<T>) -> Self {
        Self::TokioMpsc(value)
    }
}

impl<T: Send + Sync + 'static> EventHandler<T> {
    /// Construct a new event handler with a callback.
    pub fn callback(f: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self::Callback(Arc::new(f))
    }

    /// Construct a new event handler with an async callback.
    pub fn async_callback(f: impl Fn(T) -> BoxFuture<'static, ()> + Send + Sync + 'static) -> Self {
        Self::AsyncCallback(Arc::new(f))
    }

    pub(crate) fn handle(&self, event: T) {
        match self {
            Self::Callback(cb) => (cb)(event),
            Self::AsyncCallback(cb) => {
                crate::runtime::spawn((cb)(event));
            }
            Self::TokioMpsc(sender) => {
                let sender = sender.clone();
                crate::runtime::spawn(async move {
                    let _ = sender.send(event).await;
                });
            }
        }
    }
}
