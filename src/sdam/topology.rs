use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tokio::sync::{
    broadcast,
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    watch::{self, Ref},
};

use super::{monitor::Monitor, Server, ServerDescription, TopologyDescription};
use crate::{
    bson::oid::ObjectId,
    client::session::ClusterTime,
    cmap::options::ConnectionPoolOptions,
    error::{Error, Result},
    event::sdam::{
        ServerClosedEvent,
        ServerDescriptionChangedEvent,
        ServerOpeningEvent,
        TopologyClosedEvent,
        TopologyDescriptionChangedEvent,
        TopologyOpeningEvent,
    },
    options::{ClientOptions, ServerAddress},
    runtime::{self, AcknowledgedMessage, WorkerHandle, WorkerHandleListener},
    trace::{topology::SdamEventEmitter, TOPOLOGY_TRACING_EVENT_TARGET},
};

/// A handle to the client's view of the deployment. The description is owned by a single worker
/// task; everything else reads the snapshots it publishes.
#[derive(Debug)]
pub(crate) struct Topology {
    watcher: TopologyWatcher,
    updater: TopologyUpdater,
    update_requester: UpdateRequester,
    _worker_handle: WorkerHandle,
}

impl Topology {
    /// Creates the topology and starts monitoring every seed.
    pub(crate) fn new(options: ClientOptions) -> Topology {
        let id = ObjectId::new();
        let description = TopologyDescription::new(&options);
        let pool_options = ConnectionPoolOptions::from_client_options(&options);
        let emitter = SdamEventEmitter::new(id, options.sdam_event_handler.clone());

        let (updater, update_receiver) = TopologyUpdater::channel();
        let (update_requester, _) = UpdateRequester::channel();
        let (worker_handle, handle_listener) = WorkerHandleListener::channel();

        let servers = description
            .server_addresses()
            .map(|address| {
                (
                    address.clone(),
                    Server::new(address.clone(), pool_options.clone(), updater.clone()),
                )
            })
            .collect();
        let state = TopologyState {
            description,
            servers,
            closed: false,
        };
        let addresses: Vec<ServerAddress> = state.servers.keys().cloned().collect();
        let (watcher, broadcaster) = TopologyWatcher::channel(state);

        emitter.emit(TopologyOpeningEvent { topology_id: id });
        for address in &addresses {
            emitter.emit(ServerOpeningEvent {
                address: address.clone(),
                topology_id: id,
            });
        }

        let worker = TopologyWorker {
            update_receiver,
            broadcaster,
            options,
            pool_options,
            topology_watcher: watcher.clone(),
            topology_updater: updater.clone(),
            update_requester: update_requester.clone(),
            emitter,
            handle_listener,
        };
        for address in addresses {
            worker.start_monitor(address);
        }
        worker.start();

        Topology {
            watcher,
            updater,
            update_requester,
            _worker_handle: worker_handle,
        }
    }

    /// A watcher positioned at the latest published state.
    pub(crate) fn watch(&self) -> TopologyWatcher {
        let mut watcher = self.watcher.clone();
        watcher.receiver.borrow_and_update();
        watcher
    }

    /// Asks every monitor to check its server now.
    pub(crate) fn request_update(&self) {
        self.update_requester.request();
    }

    /// Reports an error seen while running an operation. Returns whether the topology changed.
    pub(crate) async fn handle_application_error(
        &self,
        address: ServerAddress,
        error: Error,
    ) -> bool {
        self.updater.handle_application_error(address, error).await
    }

    pub(crate) fn cluster_time(&self) -> Option<ClusterTime> {
        self.watcher
            .borrow_latest()
            .description
            .cluster_time()
            .cloned()
    }

    pub(crate) async fn advance_cluster_time(&self, to: ClusterTime) {
        self.updater.advance_cluster_time(to).await;
    }

    /// Stops the monitors and closes every pool. Operations started afterwards fail.
    pub(crate) async fn shutdown(&self) {
        self.updater.shutdown().await;
    }

    #[cfg(test)]
    pub(crate) fn description(&self) -> TopologyDescription {
        self.watcher.borrow_latest().description.clone()
    }

    #[cfg(test)]
    pub(crate) fn updater(&self) -> TopologyUpdater {
        self.updater.clone()
    }
}

/// One published snapshot: the description and the servers it names.
#[derive(Debug, Clone)]
pub(crate) struct TopologyState {
    pub(crate) description: TopologyDescription,
    pub(crate) servers: HashMap<ServerAddress, Arc<Server>>,
    pub(crate) closed: bool,
}

#[derive(Debug)]
pub(crate) enum UpdateMessage {
    AdvanceClusterTime(ClusterTime),
    ServerUpdate(Box<ServerDescription>),
    MonitorError { address: ServerAddress, error: Error },
    ApplicationError { address: ServerAddress, error: Error },
    Shutdown,
}

struct TopologyWorker {
    update_receiver: TopologyUpdateReceiver,
    broadcaster: TopologyBroadcaster,
    options: ClientOptions,
    pool_options: ConnectionPoolOptions,
    topology_watcher: TopologyWatcher,
    topology_updater: TopologyUpdater,
    update_requester: UpdateRequester,
    emitter: SdamEventEmitter,
    handle_listener: WorkerHandleListener,
}

impl TopologyWorker {
    fn start(mut self) {
        runtime::spawn(async move {
            loop {
                tokio::select! {
                    Some(update) = self.update_receiver.recv() => {
                        let (update, ack) = update.into_parts();
                        let changed = match update {
                            UpdateMessage::AdvanceClusterTime(to) => {
                                self.advance_cluster_time(to);
                                true
                            }
                            UpdateMessage::ServerUpdate(sd) => self.update_server(*sd),
                            UpdateMessage::MonitorError { address, error } => {
                                self.handle_monitor_error(address, error)
                            }
                            UpdateMessage::ApplicationError { address, error } => {
                                self.handle_application_error(address, error)
                            }
                            UpdateMessage::Shutdown => {
                                self.close();
                                let _ = ack.send(true);
                                return;
                            }
                        };
                        let _ = ack.send(changed);
                    }
                    _ = self.handle_listener.wait_for_all_handle_drops() => break,
                }
            }
            self.close();
        });
    }

    fn start_monitor(&self, address: ServerAddress) {
        Monitor::start(
            address,
            self.topology_updater.clone(),
            self.topology_watcher.clone(),
            self.update_requester.subscribe(),
            self.options.clone(),
            self.emitter.clone(),
        );
    }

    fn advance_cluster_time(&mut self, to: ClusterTime) {
        let mut latest_state = self.broadcaster.clone_latest();
        latest_state.description.advance_cluster_time(&to);
        self.broadcaster.publish_new_state(latest_state);
    }

    /// Adds a server and pool for every new address and drops the removed ones. Returns the added
    /// addresses, which need monitors once the new state is published.
    fn sync_hosts(&self, state: &mut TopologyState) -> Vec<ServerAddress> {
        let hosts: HashSet<ServerAddress> =
            state.description.server_addresses().cloned().collect();

        state.servers.retain(|address, server| {
            let keep = hosts.contains(address);
            if !keep {
                server.pool.close();
            }
            keep
        });

        let mut added = Vec::new();
        for address in hosts {
            if state.servers.contains_key(&address) {
                continue;
            }
            let server = Server::new(
                address.clone(),
                self.pool_options.clone(),
                self.topology_updater.clone(),
            );
            state.servers.insert(address.clone(), server);
            added.push(address);
        }
        added
    }

    /// Applies a server description. Returns whether the topology changed.
    fn update_server(&mut self, sd: ServerDescription) -> bool {
        let mut latest_state = self.broadcaster.clone_latest();
        if latest_state.closed {
            return false;
        }
        let old_description = latest_state.description.clone();

        if let Err(error) = latest_state.description.update(sd) {
            tracing::warn!(
                target: TOPOLOGY_TRACING_EVENT_TARGET,
                error = %error,
                "Ignoring invalid server description"
            );
            return false;
        }
        let added = self.sync_hosts(&mut latest_state);

        let changed = self.process_topology_diff(&old_description, &latest_state.description);
        if changed {
            self.broadcaster.publish_new_state(latest_state);
        }
        for address in added {
            self.start_monitor(address);
        }
        changed
    }

    fn process_topology_diff(
        &self,
        old_description: &TopologyDescription,
        new_description: &TopologyDescription,
    ) -> bool {
        let diff = match old_description.diff(new_description) {
            Some(diff) => diff,
            None => return false,
        };
        let topology_id = self.emitter.topology_id();

        for (address, (previous_description, new_description)) in diff.changed_servers {
            self.emitter.emit(Box::new(ServerDescriptionChangedEvent {
                address: address.clone(),
                topology_id,
                previous_description: previous_description.clone(),
                new_description: new_description.clone(),
            }));
        }

        for address in diff.removed_addresses {
            self.emitter.emit(ServerClosedEvent {
                address: address.clone(),
                topology_id,
            });
        }

        for address in diff.added_addresses {
            self.emitter.emit(ServerOpeningEvent {
                address: address.clone(),
                topology_id,
            });
        }

        self.emitter.emit(Box::new(TopologyDescriptionChangedEvent {
            topology_id,
            previous_description: old_description.clone(),
            new_description: new_description.clone(),
        }));
        true
    }

    fn mark_server_as_unknown(&mut self, address: ServerAddress, error: Error) -> bool {
        self.update_server(ServerDescription::new_from_error(address, error))
    }

    /// Reacts to an error seen while opening or using a pooled connection.
    fn handle_application_error(&mut self, address: ServerAddress, error: Error) -> bool {
        let server = match self.server(&address) {
            Some(server) => server,
            None => return false,
        };

        if error.is_configuration_error() {
            self.mark_server_as_unknown(address, error)
        } else if error.is_state_change_error() {
            let updated = self.mark_server_as_unknown(address, error.clone());
            if updated && error.is_shutting_down() {
                server.pool.clear(error);
            }
            self.update_requester.request();
            updated
        } else if error.is_network_error() && !error.is_network_timeout() {
            let updated = self.mark_server_as_unknown(address, error.clone());
            if updated {
                server.pool.clear(error);
            }
            self.update_requester.request();
            updated
        } else {
            false
        }
    }

    fn handle_monitor_error(&mut self, address: ServerAddress, error: Error) -> bool {
        match self.server(&address) {
            Some(server) => {
                let updated = self.mark_server_as_unknown(address, error.clone());
                if updated {
                    server.pool.clear(error);
                }
                updated
            }
            None => false,
        }
    }

    fn server(&self, address: &ServerAddress) -> Option<Arc<Server>> {
        self.broadcaster
            .borrow_latest()
            .servers
            .get(address)
            .cloned()
    }

    fn close(&self) {
        let mut state = self.broadcaster.clone_latest();
        for server in state.servers.values() {
            server.pool.close();
        }
        state.servers.clear();
        state.closed = true;
        self.broadcaster.publish_new_state(state);
        self.emitter.emit(TopologyClosedEvent {
            topology_id: self.emitter.topology_id(),
        });
    }
}

/// Sends updates to the topology worker. Every update is acknowledged with whether it changed the
/// topology.
#[derive(Debug, Clone)]
pub(crate) struct TopologyUpdater {
    sender: UnboundedSender<AcknowledgedMessage<UpdateMessage, bool>>,
}

impl TopologyUpdater {
    pub(crate) fn channel() -> (TopologyUpdater, TopologyUpdateReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            TopologyUpdater { sender: tx },
            TopologyUpdateReceiver {
                update_receiver: rx,
            },
        )
    }

    async fn send_message(&self, update: UpdateMessage) -> bool {
        let (message, receiver) = AcknowledgedMessage::package(update);

        match self.sender.send(message) {
            Ok(_) => receiver.wait_for_acknowledgment().await.unwrap_or(false),
            _ => false,
        }
    }

    pub(crate) async fn handle_monitor_error(&self, address: ServerAddress, error: Error) -> bool {
        self.send_message(UpdateMessage::MonitorError { address, error })
            .await
    }

    pub(crate) async fn handle_application_error(
        &self,
        address: ServerAddress,
        error: Error,
    ) -> bool {
        self.send_message(UpdateMessage::ApplicationError { address, error })
            .await
    }

    pub(crate) async fn update(&self, sd: ServerDescription) -> bool {
        self.send_message(UpdateMessage::ServerUpdate(Box::new(sd)))
            .await
    }

    pub(crate) async fn advance_cluster_time(&self, to: ClusterTime) {
        self.send_message(UpdateMessage::AdvanceClusterTime(to))
            .await;
    }

    async fn shutdown(&self) {
        self.send_message(UpdateMessage::Shutdown).await;
    }
}

pub(crate) struct TopologyUpdateReceiver {
    update_receiver: UnboundedReceiver<AcknowledgedMessage<UpdateMessage, bool>>,
}

impl TopologyUpdateReceiver {
    pub(crate) async fn recv(&mut self) -> Option<AcknowledgedMessage<UpdateMessage, bool>> {
        self.update_receiver.recv().await
    }
}

/// Observes the snapshots published by the topology worker.
///
/// Obtained from [`Client::subscribe_to_topology_changes`](crate::Client::subscribe_to_topology_changes).
#[derive(Debug, Clone)]
pub struct TopologyWatcher {
    receiver: watch::Receiver<TopologyState>,
}

impl TopologyWatcher {
    fn channel(initial_state: TopologyState) -> (TopologyWatcher, TopologyBroadcaster) {
        let (tx, rx) = watch::channel(initial_state);
        let watcher = TopologyWatcher { receiver: rx };
        let broadcaster = TopologyBroadcaster { state_sender: tx };
        (watcher, broadcaster)
    }

    /// The latest description of the deployment.
    pub fn description(&self) -> TopologyDescription {
        self.borrow_latest().description.clone()
    }

    /// Waits up to `timeout` for the topology to change. Returns whether it did.
    pub async fn wait_for_update(&mut self, timeout: Duration) -> bool {
        let changed = matches!(
            runtime::timeout(timeout, self.receiver.changed()).await,
            Ok(Ok(()))
        );
        self.receiver.borrow_and_update();
        changed
    }

    /// Whether the topology is still being monitored.
    pub fn is_alive(&self) -> bool {
        self.receiver.has_changed().is_ok() && !self.borrow_latest().closed
    }

    pub(crate) fn server_description(&self, address: &ServerAddress) -> Option<ServerDescription> {
        self.receiver
            .borrow()
            .description
            .server(address)
            .cloned()
    }

    /// Waits until `address` is no longer part of the topology or the topology is gone.
    pub(crate) async fn wait_until_removed(&mut self, address: &ServerAddress) {
        let _ = self
            .receiver
            .wait_for(|state| !state.servers.contains_key(address))
            .await;
    }

    pub(crate) fn clone_latest(&mut self) -> TopologyState {
        self.receiver.borrow_and_update().clone()
    }

    pub(crate) fn borrow_latest(&self) -> Ref<'_, TopologyState> {
        self.receiver.borrow()
    }
}

struct TopologyBroadcaster {
    state_sender: watch::Sender<TopologyState>,
}

impl TopologyBroadcaster {
    fn clone_latest(&self) -> TopologyState {
        self.borrow_latest().clone()
    }

    fn borrow_latest(&self) -> Ref<'_, TopologyState> {
        self.state_sender.borrow()
    }

    fn publish_new_state(&self, state: TopologyState) {
        self.state_sender.send_replace(state);
    }
}

/// Requests immediate checks from the monitors.
#[derive(Clone, Debug)]
pub(crate) struct UpdateRequester {
    sender: broadcast::Sender<()>,
}

impl UpdateRequester {
    fn channel() -> (UpdateRequester, TopologyCheckRequestReceiver) {
        let (tx, rx) = broadcast::channel(1);
        (
            UpdateRequester { sender: tx },
            TopologyCheckRequestReceiver { receiver: rx },
        )
    }

    fn request(&self) {
        let _ = self.sender.send(());
    }

    fn subscribe(&self) -> TopologyCheckRequestReceiver {
        TopologyCheckRequestReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

pub(crate) struct TopologyCheckRequestReceiver {
    receiver: broadcast::Receiver<()>,
}

impl TopologyCheckRequestReceiver {
    /// Waits for a check request for at most `timeout`.
    pub(crate) async fn wait_for_check_request(&mut self, timeout: Duration) {
        let _: Result<_> = runtime::timeout(timeout, self.receiver.recv()).await;
    }

    pub(crate) fn clear_check_requests(&mut self) {
        while self.receiver.try_recv().is_ok() {}
    }
}
