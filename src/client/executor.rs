use std::sync::Arc;

use tokio::time::Instant;

use super::{session::TransactionState, Client};
use crate::{
    client::session::ClientSession,
    cmap::{Command, RawCommandResponse},
    concern::ReadConcernInternal,
    error::{
        Error,
        ErrorKind,
        Result,
        TRANSIENT_TRANSACTION_ERROR,
        UNKNOWN_TRANSACTION_COMMIT_RESULT,
    },
    operation::Operation,
    sdam::{SelectionCriteria, Server, MIN_HEARTBEAT_FREQUENCY},
    selection_criteria::ReadPreference,
    trace::SERVER_SELECTION_TRACING_EVENT_TARGET,
};

/// What the executor did to a command on behalf of a session.
#[derive(Debug, Default)]
struct SessionDecoration {
    in_transaction: bool,
    starts_transaction: bool,
    txn_command: bool,
}

impl Client {
    /// Execute the given operation, retrying it while its deadline allows.
    ///
    /// Server selection uses the criteria specified on the operation, or the pinned member when
    /// `session` is inside a transaction that already sent a statement.
    pub(crate) async fn execute_operation<T: Operation>(
        &self,
        op: &mut T,
        mut session: Option<&mut ClientSession>,
    ) -> Result<T::O> {
        if self.is_shut_down() {
            return Err(ErrorKind::Shutdown.into());
        }
        if let Some(ref session) = session {
            if !self.ptr_eq(&session.client()) {
                return Err(Error::invalid_argument(
                    "the session provided to an operation must be created from the same client as \
                     the collection/database",
                ));
            }
        }

        let caller_deadline = op.deadline();
        let deadline = caller_deadline
            .unwrap_or_else(|| Instant::now() + self.options().server_selection_timeout());

        let error = loop {
            let error = match self
                .execute_attempt(op, session.as_deref_mut(), deadline, caller_deadline)
                .await
            {
                Ok(output) => return Ok(output),
                Err(error) => error,
            };

            let pinned = session
                .as_deref()
                .map(|s| s.in_transaction() && s.transaction.pinned.is_some())
                .unwrap_or(false);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if pinned || remaining.is_zero() || !op.retryability().can_retry(&error) {
                break error;
            }

            tracing::debug!(
                target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                operation = op.name(),
                %error,
                remaining_ms = remaining.as_millis() as u64,
                "retrying operation",
            );
            tokio::time::sleep(self.options().retry_delay().min(remaining)).await;
        };

        match caller_deadline {
            Some(caller_deadline)
                if Instant::now() >= caller_deadline && !error.is_time_exceeded() =>
            {
                Err(Error::time_exceeded(format!(
                    "{} did not complete before its deadline",
                    op.name()
                ))
                .with_source(error))
            }
            _ => Err(error),
        }
    }

    /// One selection, check-out and round trip.
    async fn execute_attempt<T: Operation>(
        &self,
        op: &mut T,
        mut session: Option<&mut ClientSession>,
        deadline: Instant,
        caller_deadline: Option<Instant>,
    ) -> Result<T::O> {
        let criteria = selection_criteria_for(op, session.as_deref());
        let in_transaction = session
            .as_deref()
            .map(ClientSession::in_transaction)
            .unwrap_or(false);
        let is_commit = op.name() == "commitTransaction";

        let result = self
            .execute_on_selected(op, session.as_deref_mut(), &criteria, deadline, caller_deadline)
            .await;

        result.map_err(|mut error| {
            if in_transaction && error.is_reconnect() {
                error.add_label(TRANSIENT_TRANSACTION_ERROR);
            }
            if is_commit
                && (error.is_reconnect()
                    || error.is_time_exceeded()
                    || matches!(error.kind.as_ref(), ErrorKind::WriteConcern(_)))
            {
                error.add_label(UNKNOWN_TRANSACTION_COMMIT_RESULT);
            }
            error
        })
    }

    async fn execute_on_selected<T: Operation>(
        &self,
        op: &mut T,
        mut session: Option<&mut ClientSession>,
        criteria: &SelectionCriteria,
        deadline: Instant,
        caller_deadline: Option<Instant>,
    ) -> Result<T::O> {
        let server = self.select_server(criteria, deadline, op.name()).await?;
        let connection = server.pool.check_out(Some(deadline)).await?;

        let mut command = op.build()?;
        let decoration = match session.as_deref_mut() {
            Some(session) if op.supports_sessions() => {
                self.decorate_for_session(op, &mut command, session)?
            }
            Some(_) if !op.is_acknowledged() => {
                return Err(Error::invalid_argument(
                    "cannot use a session with an unacknowledged write concern",
                ));
            }
            _ => SessionDecoration::default(),
        };
        if !op.is_acknowledged() && !decoration.in_transaction && !decoration.txn_command {
            command.more_to_come = true;
        }

        let session_cluster_time = session.as_deref().and_then(|s| s.cluster_time().cloned());
        if let Some(cluster_time) =
            std::cmp::max(session_cluster_time, self.topology().cluster_time())
        {
            command.set_cluster_time(&cluster_time);
        }

        let result = connection.execute(command, caller_deadline).await;

        let sent = match result {
            Ok(_) => true,
            Err(ref error) => error.request_sent || !error.is_reconnect(),
        };
        if let Some(session) = session.as_deref_mut() {
            if decoration.starts_transaction && sent {
                session.transaction.state = TransactionState::InProgress;
                session.pin(server.address.clone());
            }
        }

        let result = match result {
            Ok(response) => self.handle_response(op, response, session.as_deref_mut()).await,
            Err(error) => Err(error),
        };

        match result {
            Err(error) if error.is_state_change_error() || error.is_network_error() => {
                self.topology()
                    .handle_application_error(server.address.clone(), error.clone())
                    .await;
                if error.is_network_error() {
                    if let Some(session) = session {
                        session.mark_dirty();
                    }
                }
                Err(error.into_reconnect())
            }
            other => other,
        }
    }

    /// Adds the session id, transaction fields and causal consistency read concern.
    fn decorate_for_session<T: Operation>(
        &self,
        op: &T,
        command: &mut Command,
        session: &mut ClientSession,
    ) -> Result<SessionDecoration> {
        let txn_command = matches!(
            command.name.as_str(),
            "commitTransaction" | "abortTransaction"
        );
        let in_transaction = session.in_transaction();
        let starts_transaction =
            !txn_command && session.transaction.state == TransactionState::Starting;

        if !in_transaction && !txn_command && !op.is_acknowledged() {
            return Err(Error::invalid_argument(
                "cannot use a session with an unacknowledged write concern",
            ));
        }

        command.set_session(session.id());
        if in_transaction || txn_command {
            command.set_txn_number(session.txn_number());
            command.set_autocommit();
        }

        if in_transaction && !txn_command {
            command.remove_write_concern();
            command.body.remove("readConcern");
            if let Some(read_pref) = session
                .transaction
                .options
                .as_ref()
                .and_then(|options| options.selection_criteria)
            {
                if command.read_pref.is_some() {
                    command.read_pref = Some(read_pref);
                }
            }
            if starts_transaction {
                command.set_start_transaction();
                let mut read_concern: ReadConcernInternal = session
                    .transaction
                    .options
                    .as_ref()
                    .and_then(|options| options.read_concern.clone())
                    .map(Into::into)
                    .unwrap_or_default();
                if session.causal_consistency() {
                    read_concern.after_cluster_time = session.operation_time;
                }
                command.set_read_concern(&read_concern)?;
            }
        } else if op.supports_read_concern() && session.causal_consistency() {
            if let Some(operation_time) = session.operation_time {
                let mut read_concern: ReadConcernInternal = command
                    .body
                    .get_document("readConcern")
                    .ok()
                    .and_then(|doc| crate::bson::from_document(doc.clone()).ok())
                    .unwrap_or_default();
                read_concern.after_cluster_time = Some(operation_time);
                command.set_read_concern(&read_concern)?;
            }
        }

        command.session_operation = Some(session.next_operation());
        session.update_last_use();

        Ok(SessionDecoration {
            in_transaction,
            starts_transaction,
            txn_command,
        })
    }

    async fn handle_response<T: Operation>(
        &self,
        op: &T,
        response: RawCommandResponse,
        session: Option<&mut ClientSession>,
    ) -> Result<T::O> {
        let cluster_time = response.cluster_time();
        if let Some(ref cluster_time) = cluster_time {
            self.topology()
                .advance_cluster_time(cluster_time.clone())
                .await;
        }
        if let Some(session) = session {
            if let Some(ref cluster_time) = cluster_time {
                session.advance_cluster_time(cluster_time);
            }
            if let Some(operation_time) = response.operation_time() {
                session.advance_operation_time(operation_time);
            }
        }

        match response.validate() {
            Ok(()) => op.handle_response(response),
            Err(error) => op.handle_error(error),
        }
    }

    /// Waits until a member matching `criteria` is known, up to `deadline`.
    async fn select_server(
        &self,
        criteria: &SelectionCriteria,
        deadline: Instant,
        operation_name: &str,
    ) -> Result<Arc<Server>> {
        let mut watcher = self.topology().watch();
        tracing::debug!(
            target: SERVER_SELECTION_TRACING_EVENT_TARGET,
            operation = operation_name,
            selector = %criteria,
            "server selection started",
        );

        loop {
            let state = watcher.clone_latest();
            if state.closed || !watcher.is_alive() {
                return Err(ErrorKind::Shutdown.into());
            }

            if let Some(description) = state.description.select_server(criteria)? {
                if let Some(server) = state.servers.get(&description.address) {
                    tracing::debug!(
                        target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                        operation = operation_name,
                        selector = %criteria,
                        server = %server.address,
                        "server selection succeeded",
                    );
                    return Ok(server.clone());
                }
            }

            self.topology().request_update();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let message = format!(
                    "no server matching {criteria} was available for {operation_name}"
                );
                tracing::debug!(
                    target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                    operation = operation_name,
                    selector = %criteria,
                    "server selection failed",
                );
                return Err(ErrorKind::ServerSelection { message }.into());
            }
            // Re-request on every pass: a request that arrives while a check is failing is lost.
            let interval = self.options().retry_delay().max(MIN_HEARTBEAT_FREQUENCY);
            watcher.wait_for_update(interval.min(remaining)).await;
        }
    }
}

/// The pinned member inside a transaction, then the transaction's read preference, then the
/// operation's own criteria. Defaults to the primary.
fn selection_criteria_for<T: Operation>(
    op: &T,
    session: Option<&ClientSession>,
) -> SelectionCriteria {
    if let Some(session) = session.filter(|s| s.in_transaction()) {
        if let Some(ref address) = session.transaction.pinned {
            return SelectionCriteria::Pinned(address.clone());
        }
        if let Some(read_pref) = session
            .transaction
            .options
            .as_ref()
            .and_then(|options| options.selection_criteria)
        {
            if op.selection_criteria().is_some() {
                return read_pref.into();
            }
        }
    }
    op.selection_criteria()
        .cloned()
        .unwrap_or(SelectionCriteria::ReadPreference(ReadPreference::Primary))
}
