//! Contains the `Error` and `Result` types that `mongomux` uses.


use std::{collections::HashSet, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bson::Document;

const RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];
const NOTWRITABLEPRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];
const SHUTTING_DOWN_CODES: [i32; 2] = [11600, 91];

/// Retryable write error label. Attached by the server to write failures that may be retried, and
/// by the client to connection failures that happened after a write was sent.
pub const RETRYABLE_WRITE_ERROR: &str = "RetryableWriteError";
/// Transient transaction error label. Added to connection failures that occur during a
/// transaction statement.
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";
/// Unknown transaction commit result error label. Added to commit failures where the outcome of
/// the commit on the server is unknown.
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

/// The result type for all methods that can return an error in the `mongomux` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `mongomux` crate. The inner
/// [`ErrorKind`](enum.ErrorKind.html) is wrapped in a `Box` to keep the error small.
#[derive(Clone, Debug, Error)]
#[error("Kind: {kind}, labels: {labels:?}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,

    labels: HashSet<String>,

    /// Whether the request that produced this error had been written to the socket.
    pub(crate) request_sent: bool,

    #[source]
    pub(crate) source: Option<Box<Error>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: Option<impl IntoIterator<Item = String>>) -> Self {
        let mut labels: HashSet<String> = labels
            .map(|labels| labels.into_iter().collect())
            .unwrap_or_default();
        if let ErrorKind::Command(ref command_error) = kind {
            labels.extend(command_error.labels.iter().cloned());
        }
        Self {
            kind: Box::new(kind),
            labels,
            request_sent: false,
            source: None,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Error {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Error {
        ErrorKind::Protocol {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn reconnect(message: impl Into<String>) -> Error {
        ErrorKind::Reconnect {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn time_exceeded(message: impl Into<String>) -> Error {
        ErrorKind::TimeExceeded {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Error {
        ErrorKind::Configuration {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_operation(message: impl Into<String>) -> Error {
        ErrorKind::InvalidOperation {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Error {
        ErrorKind::InvalidResponse {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn cancelled() -> Error {
        ErrorKind::Cancelled {
            message: "connection was closed while the operation was in flight".to_string(),
        }
        .into()
    }

    /// Whether this error is one of the conditions the client recovers from by reconnecting:
    /// transport failures, unreachable servers and primary step-downs.
    pub fn is_reconnect(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Reconnect { .. } | ErrorKind::Io(..) | ErrorKind::ServerSelection { .. }
        ) || self.is_state_change_error()
    }

    pub(crate) fn is_network_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Io(..) | ErrorKind::Reconnect { .. }
        )
    }

    pub(crate) fn is_network_timeout(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::TimedOut)
    }

    pub(crate) fn is_time_exceeded(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::TimeExceeded { .. })
    }

    pub(crate) fn is_configuration_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Configuration { .. })
    }

    pub(crate) fn is_protocol_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Protocol { .. })
    }

    /// Converts a not-primary or recovering reply into a `Reconnect` error. The reply is kept as
    /// the source, so its code and labels remain visible.
    pub(crate) fn into_reconnect(self) -> Error {
        if !self.is_state_change_error() || self.is_network_error() {
            return self;
        }
        let message = format!("server can no longer serve the operation: {}", self.kind);
        let labels = self.labels.clone();
        let request_sent = self.request_sent;
        Error::new(ErrorKind::Reconnect { message }, Some(labels))
            .with_request_sent(request_sent)
            .with_source(self)
    }

    /// Whether the server told us it is no longer able to serve as primary.
    pub(crate) fn is_state_change_error(&self) -> bool {
        self.is_recovering() || self.is_notwritableprimary()
    }

    pub(crate) fn is_notwritableprimary(&self) -> bool {
        self.code()
            .map(|code| NOTWRITABLEPRIMARY_CODES.contains(&code))
            .unwrap_or(false)
    }

    pub(crate) fn is_recovering(&self) -> bool {
        self.code()
            .map(|code| RECOVERING_CODES.contains(&code))
            .unwrap_or(false)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.code()
            .map(|code| SHUTTING_DOWN_CODES.contains(&code))
            .unwrap_or(false)
    }

    /// Whether a commitTransaction that failed with this error should be sent again.
    pub(crate) fn is_write_retryable(&self) -> bool {
        self.contains_label(RETRYABLE_WRITE_ERROR)
    }

    /// The server error code, if this error originated from a server reply.
    pub fn code(&self) -> Option<i32> {
        match self.kind.as_ref() {
            ErrorKind::Command(command_error) => Some(command_error.code),
            ErrorKind::WriteConcern(wc_error) => Some(wc_error.code),
            _ => None,
        }
        .or_else(|| self.source.as_ref().and_then(|s| s.code()))
    }

    /// Returns the labels for this error.
    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    /// Whether this error contains the specified label.
    pub fn contains_label<T: AsRef<str>>(&self, label: T) -> bool {
        let label = label.as_ref();
        self.labels().contains(label)
            || self
                .source
                .as_ref()
                .map(|source| source.contains_label(label))
                .unwrap_or(false)
    }

    /// Adds the given label to this error.
    pub(crate) fn add_label<T: AsRef<str>>(&mut self, label: T) {
        self.labels.insert(label.as_ref().to_string());
    }

    pub(crate) fn with_label<T: AsRef<str>>(mut self, label: T) -> Self {
        self.add_label(label);
        self
    }

    pub(crate) fn with_source<E: Into<Option<Error>>>(mut self, source: E) -> Self {
        self.source = source.into().map(Box::new);
        self
    }

    pub(crate) fn with_request_sent(mut self, sent: bool) -> Self {
        self.request_sent = sent;
        self
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into(), None::<Option<String>>)
    }
}

impl From<crate::bson::de::Error> for ErrorKind {
    fn from(err: crate::bson::de::Error) -> Self {
        Self::BsonDeserialization(err)
    }
}

impl From<crate::bson::ser::Error> for ErrorKind {
    fn from(err: crate::bson::ser::Error) -> Self {
        Self::BsonSerialization(err)
    }
}

impl From<crate::bson::raw::Error> for ErrorKind {
    fn from(err: crate::bson::raw::Error) -> Self {
        Self::Protocol {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(err: std::io::ErrorKind) -> Self {
        Self::Io(Arc::new(err.into()))
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A frame received from the server could not be decoded. The connection it arrived on is
    /// closed and the operation is not retried.
    #[error("Protocol error: {message}")]
    #[non_exhaustive]
    Protocol { message: String },

    /// The connection to the server was lost, could not be established, or the server is no
    /// longer able to serve the operation. The client reconnects in the background.
    #[error("Reconnect needed: {message}")]
    #[non_exhaustive]
    Reconnect { message: String },

    /// The operation's deadline passed before it could complete.
    #[error("Operation timed out: {message}")]
    #[non_exhaustive]
    TimeExceeded { message: String },

    /// The deployment does not match the client's configuration, or the configuration itself is
    /// unusable.
    #[error("Configuration error: {message}")]
    #[non_exhaustive]
    Configuration { message: String },

    /// A session or transaction method was called in a state that does not permit it.
    #[error("Invalid operation: {message}")]
    #[non_exhaustive]
    InvalidOperation { message: String },

    /// An invalid argument was provided.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// Wrapper around `bson::de::Error`.
    #[error("{0}")]
    BsonDeserialization(crate::bson::de::Error),

    /// Wrapper around `bson::ser::Error`.
    #[error("{0}")]
    BsonSerialization(crate::bson::ser::Error),

    /// The server returned an error to an attempted operation.
    #[error("Command failed: {0}")]
    Command(CommandError),

    /// The server could not satisfy the requested write concern.
    #[error("Write concern failed: {0:?}")]
    WriteConcern(WriteConcernError),

    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },

    /// Wrapper around [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The server returned a reply that could not be interpreted.
    #[error("The server returned an invalid reply to a database operation: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// The Client was not able to select a server for the operation.
    #[error("{message}")]
    #[non_exhaustive]
    ServerSelection { message: String },

    /// The connection carrying the operation was closed by the client.
    #[error("{message}")]
    #[non_exhaustive]
    Cancelled { message: String },

    /// A method was called on a client that was shut down.
    #[error("Client has been shut down")]
    Shutdown,
}

/// An error that occurred due to a database command failing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CommandError {
    /// Identifies the type of error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default = "String::new")]
    pub message: String,

    /// Labels categorizing the error.
    #[serde(rename = "errorLabels", default)]
    pub(crate) labels: Vec<String>,
}

impl fmt::Display for CommandError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "Error code {} ({}): {}",
            self.code, self.code_name, self.message
        )
    }
}

/// An error that occurred due to not being able to satisfy a write concern.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct WriteConcernError {
    /// Identifies the type of write concern error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(alias = "errmsg", default = "String::new")]
    pub message: String,

    /// A document identifying the write concern setting related to the error.
    #[serde(rename = "errInfo")]
    pub details: Option<Document>,
}
