use std::time::Duration;

use tokio::time::Instant;

use super::{
    topology::{TopologyCheckRequestReceiver, TopologyUpdater, TopologyWatcher},
    ServerDescription,
};
use crate::{
    cmap::{establish::ConnectionEstablisher, Connection},
    error::Result,
    event::sdam::{
        ServerHeartbeatFailedEvent,
        ServerHeartbeatStartedEvent,
        ServerHeartbeatSucceededEvent,
    },
    hello::{hello_command, run_hello, run_repl_set_status, HelloReply, MemberStatus},
    options::{ClientOptions, ServerAddress},
    runtime,
    trace::topology::SdamEventEmitter,
};

pub(crate) const MIN_HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(500);

/// Weight of the newest sample in the round-trip time average.
const RTT_ALPHA: f64 = 0.2;

/// Periodically probes one server with `isMaster`, plus `replSetGetStatus` for replica set
/// members, over a dedicated connection, and reports the result to the topology worker.
pub(crate) struct Monitor {
    address: ServerAddress,
    connection: Option<Connection>,
    establisher: ConnectionEstablisher,
    topology_updater: TopologyUpdater,
    topology_watcher: TopologyWatcher,
    check_requests: TopologyCheckRequestReceiver,
    client_options: ClientOptions,
    emitter: SdamEventEmitter,
    average_rtt: Option<Duration>,
    next_connection_id: u32,
}

impl Monitor {
    pub(crate) fn start(
        address: ServerAddress,
        topology_updater: TopologyUpdater,
        topology_watcher: TopologyWatcher,
        check_requests: TopologyCheckRequestReceiver,
        client_options: ClientOptions,
        emitter: SdamEventEmitter,
    ) {
        let monitor = Self {
            establisher: ConnectionEstablisher::from_client_options(&client_options),
            address,
            connection: None,
            topology_updater,
            topology_watcher,
            check_requests,
            client_options,
            emitter,
            average_rtt: None,
            next_connection_id: 1,
        };
        runtime::spawn(monitor.execute());
    }

    async fn execute(mut self) {
        let heartbeat_frequency = self.client_options.heartbeat_freq();

        while self.is_alive() {
            // Requests made while the check runs are kept for the next one.
            self.check_requests.clear_check_requests();
            self.check_server().await;

            #[cfg(test)]
            let min_frequency = self
                .client_options
                .test_options
                .as_ref()
                .and_then(|options| options.min_heartbeat_freq)
                .unwrap_or(MIN_HEARTBEAT_FREQUENCY);

            #[cfg(not(test))]
            let min_frequency = MIN_HEARTBEAT_FREQUENCY;

            let Self {
                address,
                topology_watcher,
                check_requests,
                ..
            } = &mut self;
            let wait = async {
                runtime::delay_for(min_frequency).await;
                check_requests
                    .wait_for_check_request(heartbeat_frequency.saturating_sub(min_frequency))
                    .await;
            };

            tokio::select! {
                _ = wait => {}
                _ = topology_watcher.wait_until_removed(address) => break,
            }
        }

        if let Some(conn) = self.connection.take() {
            conn.close();
        }
    }

    fn is_alive(&self) -> bool {
        self.topology_watcher.is_alive()
            && self
                .topology_watcher
                .server_description(&self.address)
                .is_some()
    }

    /// Checks the server and reports the outcome. A network error on a server that was
    /// available is reported right away and the check is retried once on a new connection.
    async fn check_server(&mut self) {
        let check_result = match self.perform_check().await {
            Ok(description) => Ok(description),
            Err(error) => {
                let was_available = self
                    .topology_watcher
                    .server_description(&self.address)
                    .is_some_and(|sd| sd.is_available());
                if error.is_network_error() && was_available {
                    self.topology_updater
                        .handle_monitor_error(self.address.clone(), error)
                        .await;
                    self.perform_check().await
                } else {
                    Err(error)
                }
            }
        };

        match check_result {
            Ok(description) => {
                self.topology_updater.update(description).await;
            }
            Err(error) => {
                self.topology_updater
                    .handle_monitor_error(self.address.clone(), error)
                    .await;
            }
        }
    }

    async fn perform_check(&mut self) -> Result<ServerDescription> {
        let driver_connection_id = self
            .connection
            .as_ref()
            .map_or(self.next_connection_id, |conn| conn.id);
        self.emitter.emit(ServerHeartbeatStartedEvent {
            server_address: self.address.clone(),
            driver_connection_id,
        });

        let start = Instant::now();
        let result = self.probe().await;
        let duration = start.elapsed();

        match result {
            Ok((reply, members)) => {
                let average_rtt = match self.average_rtt {
                    Some(average) => {
                        average.mul_f64(1.0 - RTT_ALPHA) + duration.mul_f64(RTT_ALPHA)
                    }
                    None => duration,
                };
                self.average_rtt = Some(average_rtt);

                self.emitter.emit(ServerHeartbeatSucceededEvent {
                    duration,
                    reply: crate::bson::to_document(&reply.command_response)
                        .unwrap_or_default(),
                    server_address: self.address.clone(),
                    driver_connection_id,
                });

                let mut description = ServerDescription::new_from_hello_reply(
                    self.address.clone(),
                    reply,
                    average_rtt,
                );
                description.members = members;
                Ok(description)
            }
            Err(error) => {
                if let Some(conn) = self.connection.take() {
                    conn.close();
                }
                self.average_rtt = None;

                self.emitter.emit(ServerHeartbeatFailedEvent {
                    duration,
                    failure: error.clone(),
                    server_address: self.address.clone(),
                    driver_connection_id,
                });
                Err(error)
            }
        }
    }

    /// Runs `isMaster`, opening the monitoring connection first if needed, then
    /// `replSetGetStatus` when the server reports a replica set name.
    async fn probe(&mut self) -> Result<(HelloReply, Vec<MemberStatus>)> {
        let timeout = self.client_options.probe_timeout();

        let reply = match self.connection {
            Some(ref conn) => {
                run_hello(
                    conn,
                    hello_command(self.client_options.app_name.as_deref(), false),
                    timeout,
                )
                .await?
            }
            None => {
                let id = self.next_connection_id;
                self.next_connection_id = self.next_connection_id.wrapping_add(1);
                let (conn, reply) = self
                    .establisher
                    .connect_and_handshake(id, self.address.clone())
                    .await?;
                conn.mark_ready();
                self.connection = Some(conn);
                reply
            }
        };

        let members = match (reply.command_response.set_name.as_ref(), &self.connection) {
            (Some(_), Some(conn)) => match run_repl_set_status(conn, timeout).await {
                Ok(status) => status.members,
                Err(error) if error.is_network_error() => return Err(error),
                Err(error) => {
                    tracing::debug!(
                        target: crate::trace::TOPOLOGY_TRACING_EVENT_TARGET,
                        serverHost = self.address.host(),
                        serverPort = self.address.port(),
                        error = %error,
                        "replSetGetStatus failed"
                    );
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };

        Ok((reply, members))
    }
}
