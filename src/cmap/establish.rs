use std::time::Duration;

use super::{conn::ConnectionOptions, options::ConnectionPoolOptions, Connection};
use crate::{
    error::Result,
    hello::{check_set_name, hello_command, run_hello, HelloReply},
    options::{ClientOptions, ServerAddress},
    trace::command::CommandEventEmitter,
};

/// Contains the logic to establish a connection: opening the transport and running the
/// `isMaster` handshake.
#[derive(Clone, Debug)]
pub(crate) struct ConnectionEstablisher {
    connect_timeout: Duration,
    handshake_timeout: Duration,
    app_name: Option<String>,
}

impl ConnectionEstablisher {
    pub(crate) fn new(connect_timeout: Duration, handshake_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            handshake_timeout,
            app_name: None,
        }
    }

    pub(crate) fn from_client_options(options: &ClientOptions) -> Self {
        Self {
            app_name: options.app_name.clone(),
            ..Self::new(options.connect_timeout(), options.probe_timeout())
        }
    }

    pub(crate) fn from_pool_options(options: &ConnectionPoolOptions) -> Self {
        Self {
            app_name: options.app_name.clone(),
            ..Self::new(options.connect_timeout, options.handshake_timeout)
        }
    }

    /// Opens a connection and handshakes it, returning the handshake reply alongside it. The
    /// connection is left in the `Connecting` state.
    pub(crate) async fn connect_and_handshake(
        &self,
        id: u32,
        address: ServerAddress,
    ) -> Result<(Connection, HelloReply)> {
        let conn = Connection::connect(
            id,
            address,
            ConnectionOptions {
                connect_timeout: self.connect_timeout,
                event_emitter: None,
            },
        )
        .await?;
        let reply = run_hello(
            &conn,
            hello_command(self.app_name.as_deref(), true),
            self.handshake_timeout,
        )
        .await?;
        Ok((conn, reply))
    }

    /// Opens an application connection: handshake, replica set name check, then `Ready`. Command
    /// events are only emitted for commands sent after the handshake.
    pub(crate) async fn establish_connection(
        &self,
        id: u32,
        address: ServerAddress,
        repl_set_name: Option<&str>,
        event_emitter: CommandEventEmitter,
    ) -> Result<Connection> {
        let (mut conn, reply) = self.connect_and_handshake(id, address).await?;
        check_set_name(repl_set_name, &reply.command_response)?;
        conn.set_event_emitter(event_emitter);
        conn.mark_ready();
        Ok(conn)
    }
}
