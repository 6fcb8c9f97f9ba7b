//! The probe commands: `isMaster` for role introspection and `replSetGetStatus` for member
//! states.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    bson::{doc, oid::ObjectId, Document},
    cmap::{Command, Connection, RawCommandResponse},
    error::{Error, Result},
    options::ServerAddress,
    runtime,
    sdam::ServerType,
};

pub(crate) const LEGACY_HELLO_COMMAND_NAME: &str = "isMaster";
pub(crate) const REPL_SET_GET_STATUS_COMMAND_NAME: &str = "replSetGetStatus";

/// Construct an `isMaster` command. The handshake variant carries the client metadata.
pub(crate) fn hello_command(app_name: Option<&str>, handshake: bool) -> Command {
    let mut body = doc! { LEGACY_HELLO_COMMAND_NAME: 1 };
    if handshake {
        body.insert("client", client_metadata(app_name));
    }
    Command::new(LEGACY_HELLO_COMMAND_NAME, "admin", body)
}

fn client_metadata(app_name: Option<&str>) -> Document {
    let mut metadata = doc! {
        "driver": {
            "name": "mongomux",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "os": {
            "type": std::env::consts::OS,
            "architecture": std::env::consts::ARCH,
        },
        "platform": format!("rustc {}", rustc_version_runtime::version()),
    };
    if let Some(name) = app_name {
        metadata.insert("application", doc! { "name": name });
    }
    metadata
}

/// Execute an `isMaster` command, bounded by `timeout`.
pub(crate) async fn run_hello(
    conn: &Connection,
    command: Command,
    timeout: Duration,
) -> Result<HelloReply> {
    let response = runtime::timeout(timeout, conn.execute(command, None)).await??;
    response.into_hello_reply()
}

/// Execute a `replSetGetStatus` command, bounded by `timeout`.
pub(crate) async fn run_repl_set_status(
    conn: &Connection,
    timeout: Duration,
) -> Result<ReplSetStatus> {
    let command = Command::new(
        REPL_SET_GET_STATUS_COMMAND_NAME,
        "admin",
        doc! { REPL_SET_GET_STATUS_COMMAND_NAME: 1 },
    );
    let response = runtime::timeout(timeout, conn.execute(command, None)).await??;
    response.validate()?;
    response.body()
}

impl RawCommandResponse {
    pub(crate) fn into_hello_reply(self) -> Result<HelloReply> {
        self.validate()?;
        let command_response: HelloCommandResponse = self.body()?;
        Ok(HelloReply {
            cluster_time: self.cluster_time(),
            server_address: self.source,
            command_response,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HelloReply {
    pub(crate) server_address: ServerAddress,
    pub(crate) command_response: HelloCommandResponse,
    pub(crate) cluster_time: Option<crate::client::session::ClusterTime>,
}

/// The response to an `isMaster` command.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HelloCommandResponse {
    /// Whether the server is writable: a primary, or a standalone.
    #[serde(rename = "ismaster", alias = "isWritablePrimary")]
    pub(crate) is_master: Option<bool>,

    /// The list of all hosts.
    pub(crate) hosts: Option<Vec<String>>,

    /// The list of all passives in a replica set.
    pub(crate) passives: Option<Vec<String>>,

    /// The list of all arbiters in a replica set.
    pub(crate) arbiters: Option<Vec<String>>,

    /// An optional message.
    pub(crate) msg: Option<String>,

    /// The address of the server that returned this response.
    pub(crate) me: Option<String>,

    /// The current replica set config version.
    pub(crate) set_version: Option<i32>,

    /// The name of the current replica set.
    pub(crate) set_name: Option<String>,

    pub(crate) hidden: Option<bool>,

    pub(crate) secondary: Option<bool>,

    pub(crate) arbiter_only: Option<bool>,

    /// Set by members that are not yet initialized.
    #[serde(rename = "isreplicaset")]
    pub(crate) is_replica_set: Option<bool>,

    /// The maximum wire version that the server supports.
    pub(crate) max_wire_version: Option<i32>,

    /// A unique identifier for each election.
    pub(crate) election_id: Option<ObjectId>,

    /// The address of current primary member of the replica set.
    pub(crate) primary: Option<String>,

    /// The maximum permitted size of a wire protocol message.
    pub(crate) max_message_size_bytes: Option<i32>,
}

impl HelloCommandResponse {
    pub(crate) fn server_type(&self) -> ServerType {
        if self.set_name.is_some() {
            if self.hidden == Some(true) || self.arbiter_only == Some(true) {
                ServerType::Other
            } else if self.is_master == Some(true) {
                ServerType::Primary
            } else if self.secondary == Some(true) {
                ServerType::Secondary
            } else {
                ServerType::Other
            }
        } else if self.is_replica_set == Some(true) {
            ServerType::Other
        } else if self.is_master == Some(true) {
            // A standalone accepts writes like a primary.
            ServerType::Primary
        } else {
            ServerType::Other
        }
    }

    /// Every member address this server reports, in the order hosts, passives, arbiters.
    pub(crate) fn known_hosts(&self) -> Result<Vec<ServerAddress>> {
        self.hosts
            .iter()
            .chain(self.passives.iter())
            .chain(self.arbiters.iter())
            .flatten()
            .map(ServerAddress::parse)
            .collect()
    }

    pub(crate) fn primary_address(&self) -> Option<ServerAddress> {
        self.primary
            .as_ref()
            .and_then(|primary| ServerAddress::parse(primary).ok())
    }
}

/// The subset of a `replSetGetStatus` reply used for topology tracking.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReplSetStatus {
    pub(crate) set: Option<String>,

    #[serde(default)]
    pub(crate) members: Vec<MemberStatus>,
}

/// One entry of a `replSetGetStatus` member list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct MemberStatus {
    /// The member's address, as configured in the replica set.
    pub name: String,

    /// The numeric member state, e.g. 1 for primary and 2 for secondary.
    #[serde(default)]
    pub state: i32,

    /// The member state as a string, e.g. "PRIMARY".
    #[serde(default)]
    pub state_str: String,

    /// 1 if the member is up, 0 if it is down.
    #[serde(default, deserialize_with = "deserialize_health")]
    pub health: f64,
}

fn deserialize_health<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = crate::bson::Bson::deserialize(deserializer)?;
    crate::serde_util::get_int(&value)
        .map(|health| health as f64)
        .or_else(|| value.as_f64())
        .ok_or_else(|| serde::de::Error::custom(format!("invalid member health {value}")))
}

impl ReplSetStatus {
    /// The addresses of all members listed in the status.
    pub(crate) fn member_addresses(&self) -> Vec<ServerAddress> {
        self.members
            .iter()
            .filter_map(|member| ServerAddress::parse(&member.name).ok())
            .collect()
    }
}

pub(crate) fn check_set_name(expected: Option<&str>, reply: &HelloCommandResponse) -> Result<()> {
    match (expected, reply.set_name.as_deref()) {
        (Some(expected), actual) if actual != Some(expected) => Err(Error::configuration(format!(
            "replica set name mismatch: expected \"{expected}\", server reports {}",
            actual
                .map(|name| format!("\"{name}\""))
                .unwrap_or_else(|| "no replica set".to_string())
        ))),
        _ => Ok(()),
    }
}
