use std::time::Duration;

use crate::{options::ClientOptions, trace::command::CommandEventEmitter};

/// The subset of the client options that governs how a pool opens connections.
#[derive(Clone, Debug, Default)]
pub(crate) struct ConnectionPoolOptions {
    /// Zero means no timeout.
    pub(crate) connect_timeout: Duration,

    /// Bounds the handshake `isMaster`.
    pub(crate) handshake_timeout: Duration,

    /// The first reconnect delay after a failure.
    pub(crate) retry_delay: Duration,

    /// The largest reconnect delay.
    pub(crate) max_delay: Duration,

    pub(crate) app_name: Option<String>,

    /// Servers reporting a different replica set name are rejected during the handshake.
    pub(crate) repl_set_name: Option<String>,

    pub(crate) event_emitter: CommandEventEmitter,
}

impl ConnectionPoolOptions {
    pub(crate) fn from_client_options(options: &ClientOptions) -> Self {
        Self {
            connect_timeout: options.connect_timeout(),
            handshake_timeout: options.probe_timeout(),
            retry_delay: options.retry_delay(),
            max_delay: options.max_delay(),
            app_name: options.app_name.clone(),
            repl_set_name: options.repl_set_name.clone(),
            event_emitter: CommandEventEmitter::new(options.command_event_handler.clone()),
        }
    }
}
