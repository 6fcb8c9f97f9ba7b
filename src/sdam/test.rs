use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    error::Error,
    event::sdam::SdamEvent,
    sdam::{ServerType, Topology, TopologyType},
    test::{client_options, wait_for_topology, EventBuffer, MockRole, MockServer},
};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn discovers_replica_set_from_secondary_seed() {
    let rs = MockServer::replica_set("rs0", 3).await;
    let topology = Topology::new(client_options(&rs[1].uri("")));
    let mut watcher = topology.watch();

    let discovered = wait_for_topology(&mut watcher, DISCOVERY_TIMEOUT, |description| {
        description.topology_type() == TopologyType::ReplicaSetWithPrimary
            && description.servers().count() == 3
            && description.secondaries().count() == 2
    })
    .await;
    assert!(discovered, "{:#?}", watcher.description());

    let description = topology.description();
    assert_eq!(description.set_name(), Some("rs0"));
    assert_eq!(
        description.primary().map(|primary| primary.address().clone()),
        Some(rs[0].address().clone())
    );
}

#[tokio::test]
async fn member_states_come_from_repl_set_status() {
    let rs = MockServer::replica_set("rs0", 2).await;
    let topology = Topology::new(client_options(&rs[0].uri("")));
    let mut watcher = topology.watch();

    let probed = wait_for_topology(&mut watcher, DISCOVERY_TIMEOUT, |description| {
        description
            .primary()
            .is_some_and(|primary| primary.members().len() == 2)
    })
    .await;
    assert!(probed);

    let description = topology.description();
    let primary = description.primary().unwrap();
    let own = primary
        .members()
        .iter()
        .find(|member| member.name == rs[0].address().to_string())
        .unwrap();
    assert_eq!(own.state, 1);
    assert!(primary.average_round_trip_time().is_some());
}

#[tokio::test]
async fn observes_primary_change() {
    let rs = MockServer::replica_set("rs0", 2).await;
    let topology = Topology::new(client_options(&rs[0].uri("")));
    let mut watcher = topology.watch();
    assert!(
        wait_for_topology(&mut watcher, DISCOVERY_TIMEOUT, |d| d.primary().is_some()).await
    );

    rs[0].set_role(MockRole::Secondary);
    rs[1].set_role(MockRole::Primary);
    topology.request_update();

    let switched = wait_for_topology(&mut watcher, DISCOVERY_TIMEOUT, |description| {
        description.primary().map(|primary| primary.address()) == Some(rs[1].address())
            && description
                .server(rs[0].address())
                .is_some_and(|server| server.server_type() == ServerType::Secondary)
    })
    .await;
    assert!(switched, "{:#?}", watcher.description());
}

#[tokio::test]
async fn set_name_mismatch_is_a_configuration_error() {
    let rs = MockServer::replica_set("rs0", 1).await;
    let mut options = client_options(&rs[0].uri(""));
    options.repl_set_name = Some("other".to_string());
    let topology = Topology::new(options);
    let mut watcher = topology.watch();

    let flagged = wait_for_topology(&mut watcher, DISCOVERY_TIMEOUT, |description| {
        description.configuration_error().is_some()
    })
    .await;
    assert!(flagged);
    assert!(topology.description().primary().is_none());
}

#[tokio::test]
async fn network_error_marks_server_unknown() {
    let server = MockServer::start(MockRole::Primary).await;
    let mut options = client_options(&server.uri(""));
    options.heartbeat_freq = Some(Duration::from_secs(60));
    let topology = Topology::new(options);
    let mut watcher = topology.watch();
    assert!(
        wait_for_topology(&mut watcher, DISCOVERY_TIMEOUT, |d| d.primary().is_some()).await
    );

    server.go_down();
    let changed = topology
        .handle_application_error(
            server.address().clone(),
            Error::reconnect("connection reset"),
        )
        .await;
    assert!(changed);

    let description = topology.description();
    let sd = description.server(server.address()).unwrap();
    assert_eq!(sd.server_type(), ServerType::Unknown);
    assert!(sd.error().is_some());

    server.come_up();
    topology.request_update();
    assert!(
        wait_for_topology(&mut watcher, DISCOVERY_TIMEOUT, |d| d.primary().is_some()).await
    );
}

#[tokio::test]
async fn timeouts_do_not_mark_server_unknown() {
    let server = MockServer::start(MockRole::Primary).await;
    let topology = Topology::new(client_options(&server.uri("")));
    let mut watcher = topology.watch();
    assert!(
        wait_for_topology(&mut watcher, DISCOVERY_TIMEOUT, |d| d.primary().is_some()).await
    );

    let changed = topology
        .handle_application_error(
            server.address().clone(),
            std::io::Error::from(std::io::ErrorKind::TimedOut).into(),
        )
        .await;
    assert!(!changed);
    assert!(topology.description().primary().is_some());
}

#[tokio::test]
async fn shutdown_stops_monitoring() {
    let server = MockServer::start(MockRole::Primary).await;
    let events = EventBuffer::<SdamEvent>::new();
    let mut options = client_options(&server.uri(""));
    options.sdam_event_handler = Some(events.handler());
    let topology = Topology::new(options);
    let mut watcher = topology.watch();
    assert!(
        wait_for_topology(&mut watcher, DISCOVERY_TIMEOUT, |d| d.primary().is_some()).await
    );

    topology.shutdown().await;
    assert!(!watcher.is_alive());

    let events = events.all();
    assert!(matches!(events.first(), Some(SdamEvent::TopologyOpening(_))));
    assert!(events
        .iter()
        .any(|event| matches!(event, SdamEvent::ServerHeartbeatSucceeded(_))));
    assert!(events
        .iter()
        .any(|event| matches!(event, SdamEvent::TopologyClosed(_))));
}
