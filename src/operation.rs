mod abort_transaction;
mod commit_transaction;
mod count_documents;
mod delete;
mod end_sessions;
mod find;
mod insert;
mod run_command;

#[cfg(test)]
mod test;

use serde::Deserialize;
use tokio::time::Instant;

use crate::{
    cmap::{Command, RawCommandResponse},
    concern::WriteConcern,
    error::{Error, Result},
    sdam::SelectionCriteria,
};

pub(crate) use abort_transaction::AbortTransaction;
pub(crate) use commit_transaction::CommitTransaction;
pub(crate) use count_documents::CountDocuments;
pub(crate) use delete::Delete;
pub(crate) use end_sessions::EndSessions;
pub(crate) use find::Find;
pub(crate) use insert::Insert;
pub(crate) use run_command::RunCommand;

/// A trait modeling the behavior of a server side operation.
///
/// No methods in this trait should have default behaviors to ensure that wrapper operations
/// replicate all behavior. Default behavior is provided by the `OperationWithDefaults` trait.
pub(crate) trait Operation {
    /// The output type of this operation.
    type O;

    /// The name of the server side command associated with this operation.
    const NAME: &'static str;

    /// Returns the command that should be sent to the server as part of this operation.
    fn build(&mut self) -> Result<Command>;

    /// Interprets the server response to the command.
    fn handle_response(&self, response: RawCommandResponse) -> Result<Self::O>;

    /// Interpret an error encountered while sending the built command to the server, potentially
    /// recovering.
    fn handle_error(&self, error: Error) -> Result<Self::O>;

    /// Criteria to use for selecting the server that this operation will be executed on.
    fn selection_criteria(&self) -> Option<&SelectionCriteria>;

    /// Whether or not this operation will request acknowledgment from the server.
    fn is_acknowledged(&self) -> bool;

    /// The write concern to use for this operation, if any.
    fn write_concern(&self) -> Option<&WriteConcern>;

    /// Returns whether or not this command supports the `readConcern` field.
    fn supports_read_concern(&self) -> bool;

    /// Whether this operation supports sessions or not.
    fn supports_sessions(&self) -> bool;

    /// The level of retryability the operation supports.
    fn retryability(&self) -> Retryability;

    /// Updates this operation as needed for a retry.
    fn update_for_retry(&mut self);

    /// The absolute time by which the operation must complete.
    fn deadline(&self) -> Option<Instant>;

    fn name(&self) -> &str;
}

/// A mirror of the `Operation` trait, with default behavior where appropriate. Should only be
/// implemented by operation types that do not delegate to other operations.
pub(crate) trait OperationWithDefaults {
    type O;

    const NAME: &'static str;

    fn build(&mut self) -> Result<Command>;

    fn handle_response(&self, response: RawCommandResponse) -> Result<Self::O>;

    fn handle_error(&self, error: Error) -> Result<Self::O> {
        Err(error)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        None
    }

    fn is_acknowledged(&self) -> bool {
        self.write_concern()
            .map(WriteConcern::is_acknowledged)
            .unwrap_or(true)
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        None
    }

    fn supports_read_concern(&self) -> bool {
        false
    }

    fn supports_sessions(&self) -> bool {
        true
    }

    fn retryability(&self) -> Retryability {
        Retryability::Write
    }

    fn update_for_retry(&mut self) {}

    fn deadline(&self) -> Option<Instant> {
        None
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}

impl<T: OperationWithDefaults> Operation for T {
    type O = T::O;
    const NAME: &'static str = T::NAME;
    fn build(&mut self) -> Result<Command> {
        self.build()
    }
    fn handle_response(&self, response: RawCommandResponse) -> Result<Self::O> {
        self.handle_response(response)
    }
    fn handle_error(&self, error: Error) -> Result<Self::O> {
        self.handle_error(error)
    }
    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria()
    }
    fn is_acknowledged(&self) -> bool {
        self.is_acknowledged()
    }
    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern()
    }
    fn supports_read_concern(&self) -> bool {
        self.supports_read_concern()
    }
    fn supports_sessions(&self) -> bool {
        self.supports_sessions()
    }
    fn retryability(&self) -> Retryability {
        self.retryability()
    }
    fn update_for_retry(&mut self) {
        self.update_for_retry()
    }
    fn deadline(&self) -> Option<Instant> {
        self.deadline()
    }
    fn name(&self) -> &str {
        self.name()
    }
}

/// How the executor may re-run an operation after a reconnect-class failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Retryability {
    /// Re-run even if the request reached the server.
    Read,

    /// Re-run only if the request never reached the server.
    Write,

    None,
}

impl Retryability {
    /// Whether an attempt that failed with `error` can be sent again.
    pub(crate) fn can_retry(&self, error: &Error) -> bool {
        if !error.is_reconnect() {
            return false;
        }
        match self {
            Self::Read => true,
            Self::Write => !error.request_sent,
            Self::None => false,
        }
    }
}

/// Adds `writeConcern` to a write command unless it is empty.
pub(crate) fn append_write_concern(
    command: &mut Command,
    write_concern: Option<&WriteConcern>,
) -> Result<()> {
    if let Some(write_concern) = write_concern.filter(|wc| !wc.is_empty()) {
        write_concern.validate()?;
        command.set_write_concern(write_concern)?;
    }
    Ok(())
}

/// Body of a write response: the number of documents affected.
#[derive(Deserialize, Debug)]
pub(crate) struct WriteResponseBody {
    pub(crate) n: u64,
}

/// Body of a response carrying a single batch of documents.
#[derive(Debug, Deserialize)]
pub(crate) struct CursorBody {
    pub(crate) cursor: CursorInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CursorInfo {
    #[serde(default)]
    pub(crate) first_batch: Vec<crate::bson::Document>,
}
