pub(crate) mod command;
#[cfg(test)]
mod test;
pub(crate) mod wire;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use derive_where::derive_where;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, oneshot, watch},
    time::Instant,
};

use self::wire::Message;
pub(crate) use self::{
    command::{Command, RawCommandResponse},
    wire::{DocumentSequence, MessageFlags},
};
use crate::{
    bson::doc,
    error::{Error, Result, RETRYABLE_WRITE_ERROR},
    event::command::{
        CommandEvent,
        CommandFailedEvent,
        CommandStartedEvent,
        CommandSucceededEvent,
        ConnectionInfo,
    },
    options::ServerAddress,
    runtime::{self, stream::tcp_connect, AcknowledgedMessage, AsyncJoinHandle},
    trace::{command::CommandEventEmitter, CONNECTION_TRACING_EVENT_TARGET},
};

/// The lifecycle of a [`Connection`]. `Failed` and `Closed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    /// The transport is open and the handshake has not completed yet.
    Connecting,
    Ready,
    /// A transport or decode error broke the connection.
    Failed,
    /// The connection was shut down by the client.
    Closed,
}

impl ConnectionState {
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

/// Options for opening a [`Connection`].
#[derive(Clone, Debug, Default)]
pub(crate) struct ConnectionOptions {
    /// Zero means no timeout.
    pub(crate) connect_timeout: Duration,

    /// Where command events go. Monitoring connections have none.
    pub(crate) event_emitter: Option<CommandEventEmitter>,
}

/// One outstanding request on one connection.
#[derive(Debug)]
struct PendingResult {
    sender: oneshot::Sender<Result<Message>>,
    created: Instant,
}

/// The request id allocator and the requests awaiting a reply.
#[derive(Debug)]
pub(crate) struct PendingRequests {
    next_request_id: i32,
    in_flight: HashMap<i32, PendingResult>,
    last_round_trip_time: Option<Duration>,
    /// Set once the connection has failed or closed; returned to new requests.
    terminal_error: Option<Error>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(next_request_id: i32) -> Self {
        Self {
            next_request_id,
            in_flight: HashMap::new(),
            last_round_trip_time: None,
            terminal_error: None,
        }
    }

    /// Returns the next request id, wrapping from `i32::MAX` back to 1 and skipping ids that
    /// still have a request in flight.
    pub(crate) fn allocate(&mut self) -> i32 {
        loop {
            let id = self.next_request_id;
            self.next_request_id = if id == i32::MAX { 1 } else { id + 1 };
            if !self.in_flight.contains_key(&id) {
                return id;
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.in_flight.len()
    }
}

#[derive(Debug)]
struct ConnectionShared {
    id: u32,
    address: ServerAddress,
    pending: Mutex<PendingRequests>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionShared {
    fn pending(&self) -> MutexGuard<'_, PendingRequests> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Routes a reply to the request it answers.
    fn dispatch(&self, message: Message) {
        let pending = {
            let mut pending = self.pending();
            let result = pending.in_flight.remove(&message.response_to);
            if let Some(ref result) = result {
                pending.last_round_trip_time = Some(result.created.elapsed());
            }
            result
        };
        match pending {
            Some(pending) => {
                let _ = pending.sender.send(Ok(message));
            }
            None => {
                tracing::debug!(
                    target: CONNECTION_TRACING_EVENT_TARGET,
                    driverConnectionId = self.id,
                    serverHost = self.address.host(),
                    serverPort = self.address.port(),
                    responseTo = message.response_to,
                    "Dropping reply to a request that is no longer pending"
                );
            }
        }
    }

    /// Moves the connection to `Failed` and fails every outstanding request with a
    /// reconnect-class error.
    fn fail(&self, cause: Error) {
        let drained = {
            let mut pending = self.pending();
            if pending.terminal_error.is_some() {
                return;
            }
            pending.terminal_error = Some(
                Error::reconnect(format!("connection to {} is broken", self.address))
                    .with_source(cause.clone()),
            );
            std::mem::take(&mut pending.in_flight)
        };
        self.state.send_replace(ConnectionState::Failed);

        tracing::debug!(
            target: CONNECTION_TRACING_EVENT_TARGET,
            driverConnectionId = self.id,
            serverHost = self.address.host(),
            serverPort = self.address.port(),
            error = %cause,
            inFlight = drained.len(),
            "Connection failed"
        );

        let error = Error::reconnect(format!("connection to {} failed: {cause}", self.address))
            .with_label(RETRYABLE_WRITE_ERROR)
            .with_source(cause)
            .with_request_sent(true);
        for (_, pending) in drained {
            let _ = pending.sender.send(Err(error.clone()));
        }
    }

    /// Moves the connection to `Closed` and cancels every outstanding request.
    fn close(&self) {
        let drained = {
            let mut pending = self.pending();
            pending.terminal_error = Some(Error::cancelled());
            std::mem::take(&mut pending.in_flight)
        };
        if self.state.send_replace(ConnectionState::Closed) != ConnectionState::Closed {
            tracing::debug!(
                target: CONNECTION_TRACING_EVENT_TARGET,
                driverConnectionId = self.id,
                serverHost = self.address.host(),
                serverPort = self.address.port(),
                "Connection closed"
            );
        }
        for (_, pending) in drained {
            let _ = pending.sender.send(Err(Error::cancelled()));
        }
    }
}

type WriteRequest = AcknowledgedMessage<Vec<u8>, Result<()>>;

/// A multiplexed connection to one server. Any number of requests may be in flight at once;
/// replies are matched to requests by their `responseTo` id.
///
/// A single writer task owns the write half of the transport and a single reader task owns the
/// read half. Dropping the connection closes it.
#[derive_where(Debug)]
pub(crate) struct Connection {
    pub(crate) id: u32,
    pub(crate) address: ServerAddress,
    shared: Arc<ConnectionShared>,
    writer: mpsc::UnboundedSender<WriteRequest>,
    #[derive_where(skip)]
    tasks: Vec<AsyncJoinHandle<()>>,
    #[derive_where(skip)]
    event_emitter: Option<CommandEventEmitter>,
}

impl Connection {
    /// Opens a TCP connection to `address`. The returned connection is `Connecting` until
    /// [`Connection::mark_ready`] is called after the handshake.
    pub(crate) async fn connect(
        id: u32,
        address: ServerAddress,
        options: ConnectionOptions,
    ) -> Result<Self> {
        let stream = tcp_connect(&address, options.connect_timeout).await?;
        Ok(Self::new(id, address, stream, options.event_emitter))
    }

    /// Wraps an already-open transport.
    pub(crate) fn new<S>(
        id: u32,
        address: ServerAddress,
        stream: S,
        event_emitter: Option<CommandEventEmitter>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(ConnectionShared {
            id,
            address: address.clone(),
            pending: Mutex::new(PendingRequests::new()),
            state,
        });

        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, requests) = mpsc::unbounded_channel();
        let tasks = vec![
            runtime::spawn(read_loop(read_half, shared.clone())),
            runtime::spawn(write_loop(write_half, requests, shared.clone())),
        ];

        Self {
            id,
            address,
            shared,
            writer,
            tasks,
            event_emitter,
        }
    }

    pub(crate) fn set_event_emitter(&mut self, event_emitter: CommandEventEmitter) {
        self.event_emitter = Some(event_emitter);
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            address: self.address.clone(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub(crate) fn is_usable(&self) -> bool {
        !self.state().is_terminal()
    }

    /// The round-trip time of the most recently answered request.
    pub(crate) fn last_round_trip_time(&self) -> Option<Duration> {
        self.shared.pending().last_round_trip_time
    }

    /// Marks the handshake as complete.
    pub(crate) fn mark_ready(&self) {
        self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Ready;
                true
            } else {
                false
            }
        });
    }

    /// Waits until the connection fails or is closed.
    pub(crate) async fn wait_for_termination(&self) -> ConnectionState {
        let mut receiver = self.shared.state.subscribe();
        let state = match receiver.wait_for(ConnectionState::is_terminal).await {
            Ok(state) => *state,
            Err(_) => ConnectionState::Closed,
        };
        state
    }

    /// Closes the connection, cancelling every outstanding request.
    pub(crate) fn close(&self) {
        self.shared.close();
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Fails the connection as if its transport had broken. Outstanding requests fail with a
    /// reconnect-class error.
    pub(crate) fn interrupt(&self, cause: Error) {
        self.shared.fail(cause);
        for task in &self.tasks {
            task.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }

    /// Sends `command` and waits for its reply.
    ///
    /// If `deadline` passes first the request is forgotten and `TimeExceeded` is returned; a
    /// reply arriving afterwards is discarded. Commands sent with `moreToCome` complete as soon as
    /// the frame has been written.
    pub(crate) async fn execute(
        &self,
        command: Command,
        deadline: Option<Instant>,
    ) -> Result<RawCommandResponse> {
        let (request_id, receiver) = {
            let mut pending = self.shared.pending();
            if let Some(ref error) = pending.terminal_error {
                return Err(error.clone());
            }
            let request_id = pending.allocate();
            let receiver = if command.more_to_come {
                None
            } else {
                let (sender, receiver) = oneshot::channel();
                pending.in_flight.insert(
                    request_id,
                    PendingResult {
                        sender,
                        created: Instant::now(),
                    },
                );
                Some(receiver)
            };
            (request_id, receiver)
        };

        let message = Message::from_command(&command, request_id);
        let start = Instant::now();
        self.emit(|connection| {
            CommandEvent::Started(CommandStartedEvent {
                command: message.document_payload.clone(),
                db: command.target_db.clone(),
                command_name: command.name.clone(),
                request_id,
                session_operation: command.session_operation,
                connection,
            })
        });

        let result = self.send_and_receive(request_id, message, receiver, deadline).await;
        if result.is_err() {
            self.shared.pending().in_flight.remove(&request_id);
        }

        let duration = start.elapsed();
        match result {
            Ok(response) => {
                match response.validate() {
                    Ok(()) => self.emit(|connection| {
                        CommandEvent::Succeeded(CommandSucceededEvent {
                            duration,
                            reply: response.body.clone(),
                            command_name: command.name.clone(),
                            request_id,
                            connection,
                        })
                    }),
                    Err(failure) => self.emit(|connection| {
                        CommandEvent::Failed(CommandFailedEvent {
                            duration,
                            command_name: command.name.clone(),
                            failure,
                            request_id,
                            connection,
                        })
                    }),
                }
                Ok(response)
            }
            Err(error) => {
                self.emit(|connection| {
                    CommandEvent::Failed(CommandFailedEvent {
                        duration,
                        command_name: command.name.clone(),
                        failure: error.clone(),
                        request_id,
                        connection,
                    })
                });
                Err(error)
            }
        }
    }

    async fn send_and_receive(
        &self,
        request_id: i32,
        message: Message,
        receiver: Option<oneshot::Receiver<Result<Message>>>,
        deadline: Option<Instant>,
    ) -> Result<RawCommandResponse> {
        let frame = message.encode()?;
        let (request, acknowledgment) = AcknowledgedMessage::package(frame);
        self.writer
            .send(request)
            .map_err(|_| Error::reconnect(format!("connection to {} is closed", self.address)))?;

        match runtime::with_deadline(deadline, acknowledgment.wait_for_acknowledgment()).await? {
            Some(Ok(())) => {}
            Some(Err(error)) => return Err(error),
            None => {
                return Err(Error::reconnect(format!(
                    "connection to {} closed before request {request_id} was written",
                    self.address
                )))
            }
        }

        let receiver = match receiver {
            Some(receiver) => receiver,
            None => {
                return Ok(RawCommandResponse {
                    source: self.address.clone(),
                    body: doc! { "ok": 1 },
                })
            }
        };

        match runtime::with_deadline(deadline, receiver).await? {
            Ok(Ok(message)) => Ok(RawCommandResponse::new(self.address.clone(), message)),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(Error::reconnect(format!(
                "connection to {} dropped request {request_id}",
                self.address
            ))
            .with_request_sent(true)),
        }
    }

    fn emit(&self, event: impl FnOnce(ConnectionInfo) -> CommandEvent) {
        if let Some(ref emitter) = self.event_emitter {
            emitter.emit(event(self.info()));
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, shared: Arc<ConnectionShared>) {
    loop {
        match Message::read_from(&mut reader, None).await {
            Ok(message) => shared.dispatch(message),
            Err(error) => {
                shared.fail(error);
                return;
            }
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut requests: mpsc::UnboundedReceiver<WriteRequest>,
    shared: Arc<ConnectionShared>,
) {
    while let Some(request) = requests.recv().await {
        let (frame, notifier) = request.into_parts();
        match write_frame(&mut writer, &frame).await {
            Ok(()) => {
                let _ = notifier.send(Ok(()));
            }
            Err(error) => {
                shared.fail(error.clone());
                let _ = notifier.send(Err(shared
                    .pending()
                    .terminal_error
                    .clone()
                    .unwrap_or(error)));
                return;
            }
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
