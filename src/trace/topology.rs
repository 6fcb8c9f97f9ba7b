use crate::{
    bson::oid::ObjectId,
    event::{
        sdam::{
            SdamEvent,
            ServerClosedEvent,
            ServerDescriptionChangedEvent,
            ServerHeartbeatFailedEvent,
            ServerHeartbeatStartedEvent,
            ServerHeartbeatSucceededEvent,
            ServerOpeningEvent,
            TopologyDescription,
            TopologyDescriptionChangedEvent,
        },
        EventHandler,
    },
    trace::{TracingRepresentation, TOPOLOGY_TRACING_EVENT_TARGET},
};

impl TracingRepresentation for TopologyDescription {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        let mut servers: Vec<String> = self
            .servers()
            .map(|server| format!("{}: {:?}", server.address(), server.server_type()))
            .collect();
        servers.sort();
        format!(
            "{{ type: {:?}, setName: {:?}, servers: [{}] }}",
            self.topology_type(),
            self.set_name(),
            servers.join(", ")
        )
    }
}

/// Emits topology monitoring events as tracing events and forwards them to the user's handler,
/// if one is configured.
#[derive(Clone, Debug)]
pub(crate) struct SdamEventEmitter {
    topology_id: ObjectId,
    handler: Option<EventHandler<SdamEvent>>,
}

impl SdamEventEmitter {
    pub(crate) fn new(topology_id: ObjectId, handler: Option<EventHandler<SdamEvent>>) -> Self {
        Self {
            topology_id,
            handler,
        }
    }

    pub(crate) fn topology_id(&self) -> ObjectId {
        self.topology_id
    }

    pub(crate) fn emit(&self, event: impl Into<SdamEvent>) {
        let event = event.into();
        self.trace(&event);
        if let Some(ref handler) = self.handler {
            handler.handle(event);
        }
    }

    fn trace(&self, event: &SdamEvent) {
        match event {
            SdamEvent::ServerDescriptionChanged(event) => {
                self.trace_server_description_changed(event)
            }
            SdamEvent::ServerOpening(event) => self.trace_server_opening(event),
            SdamEvent::ServerClosed(event) => self.trace_server_closed(event),
            SdamEvent::TopologyDescriptionChanged(event) => {
                self.trace_topology_description_changed(event)
            }
            SdamEvent::TopologyOpening(_) => {
                tracing::debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    topologyId = %self.topology_id,
                    "Starting topology monitoring"
                );
            }
            SdamEvent::TopologyClosed(_) => {
                tracing::debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    topologyId = %self.topology_id,
                    "Stopped topology monitoring"
                );
            }
            SdamEvent::ServerHeartbeatStarted(event) => self.trace_heartbeat_started(event),
            SdamEvent::ServerHeartbeatSucceeded(event) => self.trace_heartbeat_succeeded(event),
            SdamEvent::ServerHeartbeatFailed(event) => self.trace_heartbeat_failed(event),
        }
    }

    fn trace_server_description_changed(&self, event: &ServerDescriptionChangedEvent) {
        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            topologyId = %self.topology_id,
            serverHost = event.address.host(),
            serverPort = event.address.port(),
            previousType = ?event.previous_description.server_type(),
            newType = ?event.new_description.server_type(),
            "Server description changed"
        );
    }

    fn trace_server_opening(&self, event: &ServerOpeningEvent) {
        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            topologyId = %self.topology_id,
            serverHost = event.address.host(),
            serverPort = event.address.port(),
            "Starting server monitoring"
        );
    }

    fn trace_server_closed(&self, event: &ServerClosedEvent) {
        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            topologyId = %self.topology_id,
            serverHost = event.address.host(),
            serverPort = event.address.port(),
            "Stopped server monitoring"
        );
    }

    fn trace_topology_description_changed(&self, event: &TopologyDescriptionChangedEvent) {
        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            topologyId = %self.topology_id,
            previousDescription = event.previous_description.tracing_representation(),
            newDescription = event.new_description.tracing_representation(),
            "Topology description changed"
        );
    }

    fn trace_heartbeat_started(&self, event: &ServerHeartbeatStartedEvent) {
        tracing::trace!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            topologyId = %self.topology_id,
            serverHost = event.server_address.host(),
            serverPort = event.server_address.port(),
            driverConnectionId = event.driver_connection_id,
            "Server heartbeat started"
        );
    }

    fn trace_heartbeat_succeeded(&self, event: &ServerHeartbeatSucceededEvent) {
        tracing::trace!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            topologyId = %self.topology_id,
            serverHost = event.server_address.host(),
            serverPort = event.server_address.port(),
            driverConnectionId = event.driver_connection_id,
            reply = event.reply.tracing_representation(),
            durationMS = event.duration.as_millis() as u64,
            "Server heartbeat succeeded"
        );
    }

    fn trace_heartbeat_failed(&self, event: &ServerHeartbeatFailedEvent) {
        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            topologyId = %self.topology_id,
            serverHost = event.server_address.host(),
            serverPort = event.server_address.port(),
            driverConnectionId = event.driver_connection_id,
            failure = event.failure.tracing_representation(),
            durationMS = event.duration.as_millis() as u64,
            "Server heartbeat failed"
        );
    }
}
