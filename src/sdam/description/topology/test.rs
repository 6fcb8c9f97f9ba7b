use std::time::Duration;

use pretty_assertions::assert_eq;

use super::{server_selection::SelectionCriteria, TopologyDescription, TopologyType};
use crate::{
    bson::oid::ObjectId,
    error::Error,
    hello::{HelloCommandResponse, HelloReply},
    options::{ClientOptions, ServerAddress},
    sdam::description::server::{ServerDescription, ServerType},
    selection_criteria::ReadPreference,
};

const SET_NAME: &str = "rs0";

fn address(s: &str) -> ServerAddress {
    ServerAddress::parse(s).unwrap()
}

fn replica_set(hosts: &[&str]) -> TopologyDescription {
    let options = ClientOptions::builder()
        .hosts(hosts.iter().map(|h| address(h)).collect())
        .repl_set_name(SET_NAME.to_string())
        .build();
    TopologyDescription::new(&options)
}

fn member_response(is_master: bool, hosts: &[&str]) -> HelloCommandResponse {
    HelloCommandResponse {
        is_master: Some(is_master),
        secondary: Some(!is_master),
        set_name: Some(SET_NAME.to_string()),
        hosts: Some(hosts.iter().map(|h| h.to_string()).collect()),
        ..Default::default()
    }
}

fn described(host: &str, response: HelloCommandResponse, rtt_ms: u64) -> ServerDescription {
    let address = address(host);
    ServerDescription::new_from_hello_reply(
        address.clone(),
        HelloReply {
            server_address: address,
            command_response: response,
            cluster_time: None,
        },
        Duration::from_millis(rtt_ms),
    )
}

fn primary(host: &str, hosts: &[&str]) -> ServerDescription {
    described(host, member_response(true, hosts), 10)
}

fn secondary(host: &str, hosts: &[&str]) -> ServerDescription {
    described(host, member_response(false, hosts), 10)
}

fn selected(
    topology: &TopologyDescription,
    read_pref: ReadPreference,
) -> Option<ServerAddress> {
    topology
        .select_server(&SelectionCriteria::ReadPreference(read_pref))
        .unwrap()
        .map(|server| server.address.clone())
}

const HOSTS: [&str; 3] = ["a:27017", "b:27017", "c:27017"];

#[test]
fn primary_report_seeds_new_members() {
    let mut topology = replica_set(&["a:27017"]);
    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetNoPrimary);

    topology.update(primary("a:27017", &HOSTS)).unwrap();

    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetWithPrimary);
    assert_eq!(topology.servers.len(), 3);
    assert_eq!(
        topology.server(&address("c:27017")).unwrap().server_type(),
        ServerType::Unknown
    );
    assert_eq!(
        selected(&topology, ReadPreference::Primary),
        Some(address("a:27017"))
    );
}

#[test]
fn secondary_report_seeds_new_members_without_primary() {
    let mut topology = replica_set(&["b:27017"]);
    topology.update(secondary("b:27017", &HOSTS)).unwrap();

    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetNoPrimary);
    assert_eq!(topology.servers.len(), 3);
    assert_eq!(selected(&topology, ReadPreference::Primary), None);
    assert_eq!(
        selected(&topology, ReadPreference::PrimaryPreferred),
        Some(address("b:27017"))
    );
}

#[test]
fn new_primary_demotes_old_primary() {
    let mut topology = replica_set(&HOSTS);
    topology.update(primary("a:27017", &HOSTS)).unwrap();
    topology.update(primary("b:27017", &HOSTS)).unwrap();

    assert_eq!(
        topology.server(&address("a:27017")).unwrap().server_type(),
        ServerType::Unknown
    );
    assert_eq!(topology.primary().unwrap().address(), &address("b:27017"));
    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetWithPrimary);
}

#[test]
fn stale_primary_is_marked_unknown() {
    let mut topology = replica_set(&HOSTS);

    let mut current = member_response(true, &HOSTS);
    current.set_version = Some(2);
    current.election_id = Some(ObjectId::from_bytes([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]));
    topology.update(described("a:27017", current, 10)).unwrap();

    let mut stale = member_response(true, &HOSTS);
    stale.set_version = Some(2);
    stale.election_id = Some(ObjectId::from_bytes([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]));
    topology.update(described("b:27017", stale, 10)).unwrap();

    assert_eq!(
        topology.server(&address("b:27017")).unwrap().server_type(),
        ServerType::Unknown
    );
    assert_eq!(topology.primary().unwrap().address(), &address("a:27017"));
}

#[test]
fn primary_host_list_removes_unlisted_members() {
    let mut topology = replica_set(&["a:27017", "b:27017", "old:27017"]);
    topology
        .update(primary("a:27017", &["a:27017", "b:27017"]))
        .unwrap();

    assert!(topology.server(&address("old:27017")).is_none());
    assert_eq!(topology.servers.len(), 2);
}

#[test]
fn probe_failure_keeps_member() {
    let mut topology = replica_set(&HOSTS);
    topology.update(primary("a:27017", &HOSTS)).unwrap();
    topology
        .update(ServerDescription::new_from_error(
            address("a:27017"),
            Error::reconnect("probe timed out"),
        ))
        .unwrap();

    assert_eq!(topology.servers.len(), 3);
    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetNoPrimary);
    let server = topology.server(&address("a:27017")).unwrap();
    assert_eq!(server.server_type(), ServerType::Unknown);
    assert!(server.error().is_some());
}

#[test]
fn updates_from_removed_servers_are_ignored() {
    let mut topology = replica_set(&["a:27017"]);
    topology.update(primary("z:27017", &["z:27017"])).unwrap();

    assert!(topology.server(&address("z:27017")).is_none());
    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetNoPrimary);
}

#[test]
fn set_name_mismatch_is_configuration_error() {
    let mut topology = replica_set(&["a:27017"]);
    let mut response = member_response(true, &["a:27017"]);
    response.set_name = Some("other".to_string());
    topology.update(described("a:27017", response, 10)).unwrap();

    let server = topology.server(&address("a:27017")).unwrap();
    assert_eq!(server.server_type(), ServerType::Unknown);
    assert!(server.error().unwrap().is_configuration_error());

    let error = topology
        .select_server(&SelectionCriteria::ReadPreference(ReadPreference::Primary))
        .unwrap_err();
    assert!(error.is_configuration_error());
}

#[test]
fn standalone_in_replica_set_is_configuration_error() {
    let mut topology = replica_set(&["a:27017"]);
    let response = HelloCommandResponse {
        is_master: Some(true),
        ..Default::default()
    };
    topology.update(described("a:27017", response, 10)).unwrap();

    assert!(topology.configuration_error().is_some());
    assert!(topology.primary().is_none());
}

#[test]
fn learns_set_name_from_first_member() {
    let options = ClientOptions::builder()
        .hosts(vec![address("a:27017"), address("b:27017")])
        .build();
    let mut topology = TopologyDescription::new(&options);
    assert_eq!(topology.topology_type(), TopologyType::Unknown);
    assert_eq!(selected(&topology, ReadPreference::Nearest), None);

    topology.update(secondary("b:27017", &HOSTS)).unwrap();
    assert_eq!(topology.set_name(), Some(SET_NAME));
    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetNoPrimary);
}

#[test]
fn single_topology_selects_the_server() {
    let options = ClientOptions::builder()
        .hosts(vec![address("a:27017")])
        .direct_connection(true)
        .build();
    let mut topology = TopologyDescription::new(&options);
    assert_eq!(topology.topology_type(), TopologyType::Single);
    assert_eq!(selected(&topology, ReadPreference::Primary), None);

    topology.update(secondary("a:27017", &HOSTS)).unwrap();
    assert_eq!(topology.servers.len(), 1);
    assert_eq!(
        selected(&topology, ReadPreference::Primary),
        Some(address("a:27017"))
    );
}

#[test]
fn secondary_preferred_falls_back_to_primary() {
    let mut topology = replica_set(&HOSTS);
    topology.update(primary("a:27017", &HOSTS)).unwrap();

    assert_eq!(
        selected(&topology, ReadPreference::SecondaryPreferred),
        Some(address("a:27017"))
    );
    assert_eq!(selected(&topology, ReadPreference::Secondary), None);

    topology.update(secondary("b:27017", &HOSTS)).unwrap();
    assert_eq!(
        selected(&topology, ReadPreference::SecondaryPreferred),
        Some(address("b:27017"))
    );
    assert_eq!(
        selected(&topology, ReadPreference::Secondary),
        Some(address("b:27017"))
    );
}

#[test]
fn nearest_prefers_lowest_round_trip_time() {
    let mut topology = replica_set(&HOSTS);
    topology
        .update(described("a:27017", member_response(true, &HOSTS), 40))
        .unwrap();
    topology
        .update(described("b:27017", member_response(false, &HOSTS), 5))
        .unwrap();
    topology
        .update(described("c:27017", member_response(false, &HOSTS), 20))
        .unwrap();

    assert_eq!(
        selected(&topology, ReadPreference::Nearest),
        Some(address("b:27017"))
    );
}

#[test]
fn pinned_selection_requires_available_server() {
    let mut topology = replica_set(&HOSTS);
    topology.update(primary("a:27017", &HOSTS)).unwrap();

    let pinned = SelectionCriteria::Pinned(address("a:27017"));
    assert_eq!(
        topology.select_server(&pinned).unwrap().unwrap().address(),
        &address("a:27017")
    );

    let pinned_unknown = SelectionCriteria::Pinned(address("c:27017"));
    assert!(topology.select_server(&pinned_unknown).unwrap().is_none());
}

#[test]
fn diff_reports_changes() {
    let mut old = replica_set(&["a:27017", "gone:27017"]);
    old.update(secondary("a:27017", &["a:27017", "gone:27017"]))
        .unwrap();
    let mut new = old.clone();
    assert!(old.diff(&new).is_none());

    new.update(primary("a:27017", &["a:27017", "b:27017"]))
        .unwrap();
    let diff = old.diff(&new).unwrap();

    assert!(diff.added_addresses.contains(&address("b:27017")));
    assert!(diff.removed_addresses.contains(&address("gone:27017")));
    let (previous, current) = diff.changed_servers[&address("a:27017")];
    assert_eq!(previous.server_type(), ServerType::Secondary);
    assert_eq!(current.server_type(), ServerType::Primary);
}
