use std::time::Duration;

use rand::seq::IndexedRandom;

use super::{TopologyDescription, TopologyType};
use crate::{
    error::Result,
    options::ServerAddress,
    sdam::description::server::{ServerDescription, ServerType},
    selection_criteria::ReadPreference,
};

/// Describes which servers are suitable for a given operation.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SelectionCriteria {
    /// Route by role. Writes always use `ReadPreference::Primary`.
    ReadPreference(ReadPreference),

    /// Only the given server. Used by transactions after their first statement.
    Pinned(ServerAddress),
}

impl SelectionCriteria {
    pub(crate) fn as_read_pref(&self) -> Option<ReadPreference> {
        match self {
            Self::ReadPreference(read_pref) => Some(*read_pref),
            Self::Pinned(..) => None,
        }
    }
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(read_pref: ReadPreference) -> Self {
        Self::ReadPreference(read_pref)
    }
}

impl std::fmt::Display for SelectionCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadPreference(read_pref) => write!(f, "ReadPreference {read_pref}"),
            Self::Pinned(address) => write!(f, "Pinned to {address}"),
        }
    }
}

impl TopologyDescription {
    /// Picks a server for an operation. `Ok(None)` means no suitable server is known yet and the
    /// caller should wait for the topology to change. A server that is misconfigured for this
    /// client turns an otherwise empty selection into an error.
    pub(crate) fn select_server<'a>(
        &'a self,
        criteria: &SelectionCriteria,
    ) -> Result<Option<&'a ServerDescription>> {
        let suitable_servers = self.suitable_servers(criteria);

        let selected = match criteria {
            SelectionCriteria::ReadPreference(ReadPreference::Nearest) => suitable_servers
                .into_iter()
                .min_by_key(|server| server.average_round_trip_time.unwrap_or(Duration::MAX)),
            _ => suitable_servers.choose(&mut rand::rng()).copied(),
        };

        match selected {
            Some(server) => Ok(Some(server)),
            None => match self.configuration_error() {
                Some(error) => Err(error.clone()),
                None => Ok(None),
            },
        }
    }

    pub(crate) fn suitable_servers<'a>(
        &'a self,
        criteria: &SelectionCriteria,
    ) -> Vec<&'a ServerDescription> {
        match criteria {
            SelectionCriteria::Pinned(address) => self
                .servers
                .get(address)
                .filter(|server| server.is_available())
                .into_iter()
                .collect(),
            SelectionCriteria::ReadPreference(read_pref) => match self.topology_type {
                TopologyType::Unknown => Vec::new(),
                TopologyType::Single => self
                    .servers
                    .values()
                    .filter(|server| server.is_available())
                    .collect(),
                TopologyType::ReplicaSetWithPrimary | TopologyType::ReplicaSetNoPrimary => {
                    self.suitable_servers_in_replica_set(*read_pref)
                }
            },
        }
    }

    fn servers_with_type<'a>(
        &'a self,
        types: &'a [ServerType],
    ) -> impl Iterator<Item = &'a ServerDescription> {
        self.servers
            .values()
            .filter(move |server| types.contains(&server.server_type))
    }

    fn suitable_servers_in_replica_set(
        &self,
        read_preference: ReadPreference,
    ) -> Vec<&ServerDescription> {
        match read_preference {
            ReadPreference::Primary => self.servers_with_type(&[ServerType::Primary]).collect(),
            ReadPreference::Secondary => {
                self.servers_with_type(&[ServerType::Secondary]).collect()
            }
            ReadPreference::PrimaryPreferred => {
                match self.servers_with_type(&[ServerType::Primary]).next() {
                    Some(primary) => vec![primary],
                    None => self.servers_with_type(&[ServerType::Secondary]).collect(),
                }
            }
            ReadPreference::SecondaryPreferred => {
                let secondaries: Vec<_> =
                    self.servers_with_type(&[ServerType::Secondary]).collect();
                if secondaries.is_empty() {
                    self.servers_with_type(&[ServerType::Primary]).collect()
                } else {
                    secondaries
                }
            }
            ReadPreference::Nearest => self
                .servers_with_type(&[ServerType::Primary, ServerType::Secondary])
                .collect(),
        }
    }
}
