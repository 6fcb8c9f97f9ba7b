use std::time::Duration;

use serde::Serialize;

use crate::{
    bson::{oid::ObjectId, DateTime},
    error::{Error, Result},
    hello::{HelloReply, MemberStatus},
    options::ServerAddress,
};

/// The role a server plays in the deployment, as observed by the most recent probe.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub enum ServerType {
    /// The server has not been probed yet, or the last probe failed.
    #[default]
    Unknown,

    /// The replica set primary, or a standalone server.
    Primary,

    /// A replica set secondary.
    Secondary,

    /// A member that cannot serve operations: an arbiter, a hidden member or a member that is
    /// still starting up.
    Other,
}

impl ServerType {
    pub(crate) fn is_available(self) -> bool {
        matches!(self, ServerType::Primary | ServerType::Secondary)
    }
}

/// A description of one server, built from its latest probes.
#[derive(Debug, Clone)]
pub struct ServerDescription {
    pub(crate) address: ServerAddress,
    pub(crate) server_type: ServerType,
    pub(crate) last_update_time: Option<DateTime>,
    pub(crate) average_round_trip_time: Option<Duration>,

    /// `Ok(None)` until the first probe completes, the probe error if the last one failed.
    pub(crate) reply: std::result::Result<Option<HelloReply>, Error>,

    /// Member states from the last successful `replSetGetStatus`.
    pub(crate) members: Vec<MemberStatus>,
}

impl PartialEq for ServerDescription {
    fn eq(&self, other: &Self) -> bool {
        if self.address != other.address
            || self.server_type != other.server_type
            || self.members != other.members
        {
            return false;
        }

        match (self.reply.as_ref(), other.reply.as_ref()) {
            (Ok(self_reply), Ok(other_reply)) => {
                let self_response = self_reply.as_ref().map(|r| &r.command_response);
                let other_response = other_reply.as_ref().map(|r| &r.command_response);
                self_response == other_response
            }
            (Err(self_err), Err(other_err)) => self_err.to_string() == other_err.to_string(),
            _ => false,
        }
    }
}

impl ServerDescription {
    pub(crate) fn new(address: ServerAddress) -> Self {
        Self {
            address,
            server_type: ServerType::Unknown,
            last_update_time: None,
            average_round_trip_time: None,
            reply: Ok(None),
            members: Vec::new(),
        }
    }

    /// A description built from a successful `isMaster` probe.
    pub(crate) fn new_from_hello_reply(
        address: ServerAddress,
        reply: HelloReply,
        average_round_trip_time: Duration,
    ) -> Self {
        Self {
            server_type: reply.command_response.server_type(),
            last_update_time: Some(DateTime::now()),
            average_round_trip_time: Some(average_round_trip_time),
            reply: Ok(Some(reply)),
            ..Self::new(address)
        }
    }

    /// An `Unknown` description carrying the error that made the server unusable.
    pub(crate) fn new_from_error(address: ServerAddress, error: Error) -> Self {
        Self {
            reply: Err(error),
            ..Self::new(address)
        }
    }

    /// The address of the server.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// The role of the server.
    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// The exponentially weighted average of the probe round-trip times.
    pub fn average_round_trip_time(&self) -> Option<Duration> {
        self.average_round_trip_time
    }

    /// When the last successful probe completed.
    pub fn last_update_time(&self) -> Option<DateTime> {
        self.last_update_time
    }

    /// The replica set name the server reports.
    pub fn set_name(&self) -> Option<&str> {
        self.hello_response()
            .and_then(|response| response.set_name.as_deref())
    }

    /// The member states reported by the last `replSetGetStatus` probe.
    pub fn members(&self) -> &[MemberStatus] {
        &self.members
    }

    /// The error from the last probe, if it failed.
    pub fn error(&self) -> Option<&Error> {
        self.reply.as_ref().err()
    }

    pub(crate) fn is_available(&self) -> bool {
        self.server_type.is_available()
    }

    pub(crate) fn hello_response(&self) -> Option<&crate::hello::HelloCommandResponse> {
        match self.reply {
            Ok(Some(ref reply)) => Some(&reply.command_response),
            _ => None,
        }
    }

    pub(crate) fn set_version(&self) -> Option<i32> {
        self.hello_response().and_then(|r| r.set_version)
    }

    pub(crate) fn election_id(&self) -> Option<ObjectId> {
        self.hello_response().and_then(|r| r.election_id)
    }

    pub(crate) fn max_message_size_bytes(&self) -> Option<i32> {
        self.hello_response().and_then(|r| r.max_message_size_bytes)
    }

    /// The members this server reports through `isMaster` and `replSetGetStatus`.
    pub(crate) fn known_hosts(&self) -> Result<Vec<ServerAddress>> {
        let mut hosts = match self.hello_response() {
            Some(response) => response.known_hosts()?,
            None => Vec::new(),
        };
        for member in &self.members {
            let address = ServerAddress::parse(&member.name)?;
            if !hosts.contains(&address) {
                hosts.push(address);
            }
        }
        Ok(hosts)
    }
}
