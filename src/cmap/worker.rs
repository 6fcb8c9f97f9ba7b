use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::{sync::watch, time::Instant};

use super::{
    establish::ConnectionEstablisher,
    manager::{ManagementRequestReceiver, PoolManagementRequest, PoolManager},
    options::ConnectionPoolOptions,
    Connection,
};
use crate::{
    error::Error,
    options::ServerAddress,
    runtime,
    sdam::TopologyUpdater,
    trace::CONNECTION_TRACING_EVENT_TARGET,
};

/// What the pool can currently offer to an operation.
#[derive(Clone, Debug)]
pub(crate) enum PoolState {
    /// No connection has been requested yet, or the last one was cleared.
    Idle,

    /// A connection is being opened.
    Connecting,

    /// The pool's connection. Every operation routed to this server shares it.
    Ready(Arc<Connection>),

    /// The last connection attempt or connection failed; the worker reconnects on its own once
    /// the delay elapses.
    Backoff { error: Error, retry_at: Instant },

    Closed,
}

/// Reconnect delays: the first is `initial`, each following one doubles, and none exceeds `max`.
/// Up to 10% of jitter is added to every delay.
#[derive(Debug)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let base = match self.current {
            None => self.initial,
            Some(previous) => previous.saturating_mul(2).min(self.max),
        };
        self.current = Some(base);

        let jitter = rand::rng().random_range(0.0..=0.1);
        base.mul_f64(1.0 + jitter).min(self.max)
    }

    pub(crate) fn reset(&mut self) {
        self.current = None;
    }
}

/// The task that owns a server's connection. It opens the connection lazily, watches it for
/// failures, and reconnects with backoff.
pub(super) struct ConnectionPoolWorker {
    address: ServerAddress,
    establisher: ConnectionEstablisher,
    options: ConnectionPoolOptions,
    state: watch::Sender<PoolState>,
    management_receiver: ManagementRequestReceiver,
    server_updater: TopologyUpdater,
    backoff: Backoff,
    next_connection_id: u32,
}

impl ConnectionPoolWorker {
    pub(super) fn start(
        address: ServerAddress,
        options: ConnectionPoolOptions,
        server_updater: TopologyUpdater,
    ) -> (PoolManager, watch::Receiver<PoolState>) {
        let (manager, management_receiver) = PoolManager::new();
        let (state, state_receiver) = watch::channel(PoolState::Idle);

        let worker = ConnectionPoolWorker {
            establisher: ConnectionEstablisher::from_pool_options(&options),
            backoff: Backoff::new(options.retry_delay, options.max_delay),
            address,
            options,
            state,
            management_receiver,
            server_updater,
            next_connection_id: 1,
        };
        runtime::spawn(worker.execute());

        (manager, state_receiver)
    }

    async fn execute(mut self) {
        loop {
            let current = self.state.borrow().clone();
            let keep_running = match current {
                PoolState::Idle => match self.management_receiver.recv().await {
                    PoolManagementRequest::Connect => self.connect().await,
                    PoolManagementRequest::Clear(_) => true,
                    PoolManagementRequest::Close => false,
                },
                PoolState::Connecting => self.connect().await,
                PoolState::Ready(conn) => self.watch_connection(conn).await,
                PoolState::Backoff { retry_at, .. } => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(retry_at) => self.connect().await,
                        request = self.management_receiver.recv() => {
                            !matches!(request, PoolManagementRequest::Close)
                        }
                    }
                }
                PoolState::Closed => false,
            };
            if !keep_running {
                break;
            }
        }
        self.close();
    }

    /// Opens a connection. Returns whether the worker should keep running.
    async fn connect(&mut self) -> bool {
        self.state.send_replace(PoolState::Connecting);
        let id = self.next_connection_id;
        self.next_connection_id = self.next_connection_id.wrapping_add(1);

        let establisher = self.establisher.clone();
        let repl_set_name = self.options.repl_set_name.clone();
        let establish = establisher.establish_connection(
            id,
            self.address.clone(),
            repl_set_name.as_deref(),
            self.options.event_emitter.clone(),
        );

        tokio::pin!(establish);
        let result = loop {
            tokio::select! {
                result = &mut establish => break result,
                request = self.management_receiver.recv() => match request {
                    PoolManagementRequest::Connect => continue,
                    // The attempt is restarted from scratch on the next loop iteration.
                    PoolManagementRequest::Clear(_) => return true,
                    PoolManagementRequest::Close => return false,
                },
            }
        };

        match result {
            Ok(conn) => {
                tracing::debug!(
                    target: CONNECTION_TRACING_EVENT_TARGET,
                    driverConnectionId = id,
                    serverHost = self.address.host(),
                    serverPort = self.address.port(),
                    "Connection ready"
                );
                self.backoff.reset();
                self.state.send_replace(PoolState::Ready(Arc::new(conn)));
            }
            Err(error) => {
                self.server_updater
                    .handle_application_error(self.address.clone(), error.clone())
                    .await;
                self.enter_backoff(error);
            }
        }
        true
    }

    /// Waits for the ready connection to break or for a management request.
    async fn watch_connection(&mut self, conn: Arc<Connection>) -> bool {
        tokio::select! {
            state = conn.wait_for_termination() => {
                let error = Error::reconnect(format!(
                    "connection {} to {} is {state:?}",
                    conn.id, self.address
                ));
                self.server_updater
                    .handle_application_error(self.address.clone(), error.clone())
                    .await;
                self.enter_backoff(error);
                true
            }
            request = self.management_receiver.recv() => match request {
                PoolManagementRequest::Connect => true,
                PoolManagementRequest::Clear(cause) => {
                    conn.interrupt(cause);
                    self.state.send_replace(PoolState::Idle);
                    true
                }
                PoolManagementRequest::Close => false,
            },
        }
    }

    fn enter_backoff(&mut self, error: Error) {
        let delay = self.backoff.next_delay();
        tracing::debug!(
            target: CONNECTION_TRACING_EVENT_TARGET,
            serverHost = self.address.host(),
            serverPort = self.address.port(),
            error = %error,
            delayMS = delay.as_millis() as u64,
            "Reconnecting after backoff"
        );
        self.state.send_replace(PoolState::Backoff {
            error,
            retry_at: Instant::now() + delay,
        });
    }

    fn close(&mut self) {
        if let PoolState::Ready(conn) = self.state.send_replace(PoolState::Closed) {
            conn.close();
        }
    }
}
