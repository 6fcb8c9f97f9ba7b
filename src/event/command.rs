//! Contains the events and functionality for monitoring the commands and responses that a
//! `Client` sends and receives from the server.

use std::time::Duration;

use serde::Serialize;

use crate::{bson::Document, error::Error, options::ServerAddress, serde_util};

/// Information about the connection a command was sent on.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[non_exhaustive]
pub struct ConnectionInfo {
    /// The client-side id of the connection.
    pub id: u32,

    /// The address of the server the connection is to.
    pub address: ServerAddress,
}

/// An event that triggers when a database command is initiated.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CommandStartedEvent {
    /// The command being run, as sent on the wire.
    pub command: Document,

    /// The name of the database the command is being run against.
    pub db: String,

    /// The type of command being run, e.g. "find" or "commitTransaction".
    pub command_name: String,

    /// The request id on the connection. Replies are matched to requests by this id.
    pub request_id: i32,

    /// The value of the session's operation counter for this attempt, if the command was run
    /// with a session.
    pub session_operation: Option<u64>,

    /// Information about the connection the command will be run on.
    pub connection: ConnectionInfo,
}

/// An event that triggers when a database command completes without an error.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CommandSucceededEvent {
    /// The total execution time of the command (including the network round-trip).
    pub duration: Duration,

    /// The server's reply to the command.
    pub reply: Document,

    /// The type of command that was run.
    pub command_name: String,

    /// The request id of the command.
    pub request_id: i32,

    /// Information about the connection the command was run on.
    pub connection: ConnectionInfo,
}

/// An event that triggers when a command failed to complete successfully.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CommandFailedEvent {
    /// The total execution time of the command (including the network round-trip).
    pub duration: Duration,

    /// The type of command that was run.
    pub command_name: String,

    /// The error that the driver returned due to the event failing.
    #[serde(serialize_with = "serde_util::serialize_error_as_string")]
    pub failure: Error,

    /// The request id of the command.
    pub request_id: i32,

    /// Information about the connection the command was run on.
    pub connection: ConnectionInfo,
}

#[derive(Clone, Debug, Serialize, derive_more::From)]
#[serde(untagged)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum CommandEvent {
    Started(CommandStartedEvent),
    Succeeded(CommandSucceededEvent),
    Failed(CommandFailedEvent),
}
