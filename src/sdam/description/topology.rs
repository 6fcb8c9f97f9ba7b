pub(crate) mod server_selection;
#[cfg(test)]
mod test;

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::{
    bson::oid::ObjectId,
    client::session::ClusterTime,
    error::{Error, Result},
    options::{ClientOptions, ServerAddress},
    sdam::description::server::{ServerDescription, ServerType},
};

/// The shape of the deployment as currently understood by the client.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub enum TopologyType {
    /// A single server, connected to directly.
    Single,

    /// A replica set without a known primary.
    ReplicaSetNoPrimary,

    /// A replica set with a known primary.
    ReplicaSetWithPrimary,

    /// Nothing has been learned about the deployment yet.
    #[default]
    Unknown,
}

/// A consistent snapshot of every known server. Only the topology worker mutates it; everybody
/// else reads published copies.
#[derive(Debug, Clone)]
pub struct TopologyDescription {
    /// Whether the topology was seeded with exactly one host.
    single_seed: bool,

    pub(crate) topology_type: TopologyType,

    /// The replica set name, configured or learned from the first member that reported one.
    pub(crate) set_name: Option<String>,

    /// The highest `setVersion` reported by a primary.
    max_set_version: Option<i32>,

    /// The highest `electionId` reported by a primary.
    max_election_id: Option<ObjectId>,

    /// The highest `$clusterTime` seen in any probe reply.
    cluster_time: Option<ClusterTime>,

    pub(crate) servers: HashMap<ServerAddress, ServerDescription>,
}

impl PartialEq for TopologyDescription {
    fn eq(&self, other: &Self) -> bool {
        self.topology_type == other.topology_type
            && self.set_name == other.set_name
            && self.servers == other.servers
    }
}

impl TopologyDescription {
    pub(crate) fn new(options: &ClientOptions) -> Self {
        let topology_type = if options.is_direct() {
            TopologyType::Single
        } else if options.repl_set_name.is_some() {
            TopologyType::ReplicaSetNoPrimary
        } else {
            TopologyType::Unknown
        };

        let servers: HashMap<_, _> = options
            .hosts
            .iter()
            .map(|address| (address.clone(), ServerDescription::new(address.clone())))
            .collect();

        Self {
            single_seed: servers.len() == 1,
            topology_type,
            set_name: options.repl_set_name.clone(),
            max_set_version: None,
            max_election_id: None,
            cluster_time: None,
            servers,
        }
    }

    /// The current shape of the deployment.
    pub fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    /// The replica set name, if one is configured or has been reported.
    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_deref()
    }

    /// The descriptions of all known servers.
    pub fn servers(&self) -> impl Iterator<Item = &ServerDescription> {
        self.servers.values()
    }

    /// The description of the server at `address`, if it is part of the topology.
    pub fn server(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    /// The current primary. There is at most one.
    pub fn primary(&self) -> Option<&ServerDescription> {
        self.servers
            .values()
            .find(|server| server.server_type == ServerType::Primary)
    }

    /// The secondaries that are currently usable.
    pub fn secondaries(&self) -> impl Iterator<Item = &ServerDescription> {
        self.servers
            .values()
            .filter(|server| server.server_type == ServerType::Secondary)
    }

    pub(crate) fn server_addresses(&self) -> impl Iterator<Item = &ServerAddress> {
        self.servers.keys()
    }

    pub(crate) fn cluster_time(&self) -> Option<&ClusterTime> {
        self.cluster_time.as_ref()
    }

    pub(crate) fn advance_cluster_time(&mut self, cluster_time: &ClusterTime) {
        if self.cluster_time.as_ref() >= Some(cluster_time) {
            return;
        }
        self.cluster_time = Some(cluster_time.clone());
    }

    /// The first configuration error held by any server, e.g. a replica set name mismatch.
    pub(crate) fn configuration_error(&self) -> Option<&Error> {
        self.servers
            .values()
            .filter_map(ServerDescription::error)
            .find(|error| error.is_configuration_error())
    }

    /// Returns what changed between this description and `other`, or `None` if nothing did.
    pub(crate) fn diff<'a>(
        &'a self,
        other: &'a TopologyDescription,
    ) -> Option<TopologyDescriptionDiff<'a>> {
        if self == other {
            return None;
        }

        let addresses: HashSet<&ServerAddress> = self.server_addresses().collect();
        let other_addresses: HashSet<&ServerAddress> = other.server_addresses().collect();

        let changed_servers = self
            .servers
            .iter()
            .filter_map(|(address, description)| match other.servers.get(address) {
                Some(other_description) if description != other_description => {
                    Some((address, (description, other_description)))
                }
                _ => None,
            })
            .collect();

        Some(TopologyDescriptionDiff {
            removed_addresses: addresses.difference(&other_addresses).cloned().collect(),
            added_addresses: other_addresses.difference(&addresses).cloned().collect(),
            changed_servers,
        })
    }

    /// Applies a fresh description of one server and updates the rest of the topology based on
    /// what that server reported.
    pub(crate) fn update(&mut self, server_description: ServerDescription) -> Result<()> {
        // Updates from servers that have been removed are stale.
        if !self.servers.contains_key(&server_description.address) {
            return Ok(());
        }

        if let Some(cluster_time) = server_description
            .reply
            .as_ref()
            .ok()
            .and_then(|reply| reply.as_ref())
            .and_then(|reply| reply.cluster_time.as_ref())
        {
            self.advance_cluster_time(cluster_time);
        }

        self.servers.insert(
            server_description.address.clone(),
            server_description.clone(),
        );

        match self.topology_type {
            TopologyType::Single => self.update_single_topology(server_description),
            TopologyType::Unknown => self.update_unknown_topology(server_description)?,
            TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary => {
                self.update_replica_set_topology(server_description)?
            }
        }

        Ok(())
    }

    /// A directly connected server is only checked against the configured set name.
    fn update_single_topology(&mut self, server_description: ServerDescription) {
        if let Some(ref expected) = self.set_name {
            if server_description.is_available()
                && server_description.set_name() != Some(expected.as_str())
            {
                self.mark_misconfigured(
                    &server_description,
                    format!(
                        "server {} is not a member of replica set \"{expected}\"",
                        server_description.address
                    ),
                );
            }
        }
    }

    fn update_unknown_topology(&mut self, server_description: ServerDescription) -> Result<()> {
        match server_description.server_type {
            ServerType::Unknown => {}
            ServerType::Primary if server_description.set_name().is_none() => {
                if self.single_seed {
                    self.topology_type = TopologyType::Single;
                } else {
                    self.mark_misconfigured(
                        &server_description,
                        format!(
                            "server {} is a standalone but multiple seeds were given",
                            server_description.address
                        ),
                    );
                }
            }
            _ => {
                self.topology_type = TopologyType::ReplicaSetNoPrimary;
                self.update_replica_set_topology(server_description)?;
            }
        }
        Ok(())
    }

    fn update_replica_set_topology(&mut self, server_description: ServerDescription) -> Result<()> {
        match server_description.server_type {
            ServerType::Unknown => {}
            ServerType::Primary | ServerType::Secondary | ServerType::Other => {
                match (self.set_name.as_deref(), server_description.set_name()) {
                    (_, None) if server_description.server_type == ServerType::Primary => {
                        self.mark_misconfigured(
                            &server_description,
                            format!(
                                "server {} is a standalone, not a replica set member",
                                server_description.address
                            ),
                        );
                    }
                    (Some(expected), Some(actual)) if expected != actual => {
                        self.mark_misconfigured(
                            &server_description,
                            format!(
                                "replica set name mismatch: expected \"{expected}\", server {} \
                                 reports \"{actual}\"",
                                server_description.address
                            ),
                        );
                    }
                    (None, Some(actual)) => {
                        self.set_name = Some(actual.to_string());
                        self.update_from_member(server_description)?;
                    }
                    _ => self.update_from_member(server_description)?,
                }
            }
        }

        self.record_primary_state();
        Ok(())
    }

    fn update_from_member(&mut self, server_description: ServerDescription) -> Result<()> {
        if server_description.server_type == ServerType::Primary {
            self.update_from_primary(server_description)
        } else {
            self.add_new_servers(server_description.known_hosts()?);
            Ok(())
        }
    }

    fn update_from_primary(&mut self, server_description: ServerDescription) -> Result<()> {
        let set_version = server_description.set_version();
        let election_id = server_description.election_id();

        if let (Some(set_version), Some(election_id)) = (set_version, election_id) {
            if let (Some(max_set_version), Some(max_election_id)) =
                (self.max_set_version, self.max_election_id)
            {
                if (max_set_version, max_election_id) > (set_version, election_id) {
                    // A primary from an older term.
                    self.servers.insert(
                        server_description.address.clone(),
                        ServerDescription::new(server_description.address.clone()),
                    );
                    return Ok(());
                }
            }
            self.max_election_id = Some(election_id);
        }

        if let Some(set_version) = set_version {
            if self.max_set_version.map_or(true, |max| set_version > max) {
                self.max_set_version = Some(set_version);
            }
        }

        let addresses: Vec<ServerAddress> = self.servers.keys().cloned().collect();
        for address in &addresses {
            if *address == server_description.address {
                continue;
            }
            if self.servers.get(address).map(|s| s.server_type) == Some(ServerType::Primary) {
                self.servers
                    .insert(address.clone(), ServerDescription::new(address.clone()));
            }
        }

        let known_hosts = server_description.known_hosts()?;
        self.add_new_servers(known_hosts.clone());

        // The primary's host list is the replica set configuration.
        if !known_hosts.is_empty() {
            let known_hosts: HashSet<_> = known_hosts.into_iter().collect();
            self.servers.retain(|address, _| {
                known_hosts.contains(address) || *address == server_description.address
            });
        }

        Ok(())
    }

    fn mark_misconfigured(&mut self, server_description: &ServerDescription, message: String) {
        self.servers.insert(
            server_description.address.clone(),
            ServerDescription::new_from_error(
                server_description.address.clone(),
                Error::configuration(message),
            ),
        );
    }

    fn record_primary_state(&mut self) {
        self.topology_type = if self.primary().is_some() {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
    }

    fn add_new_servers(&mut self, addresses: impl IntoIterator<Item = ServerAddress>) {
        for address in addresses {
            self.servers
                .entry(address.clone())
                .or_insert_with(|| ServerDescription::new(address));
        }
    }
}

/// The differences between two topology descriptions.
#[derive(Debug)]
pub(crate) struct TopologyDescriptionDiff<'a> {
    pub(crate) removed_addresses: HashSet<&'a ServerAddress>,
    pub(crate) added_addresses: HashSet<&'a ServerAddress>,
    pub(crate) changed_servers:
        HashMap<&'a ServerAddress, (&'a ServerDescription, &'a ServerDescription)>,
}
