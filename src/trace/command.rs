use crate::{
    event::{command::CommandEvent, EventHandler},
    trace::{TracingRepresentation, COMMAND_TRACING_EVENT_TARGET},
};

/// Emits command monitoring events as tracing events and forwards them to the user's handler,
/// if one is configured.
#[derive(Clone, Debug, Default)]
pub(crate) struct CommandEventEmitter {
    handler: Option<EventHandler<CommandEvent>>,
}

impl CommandEventEmitter {
    pub(crate) fn new(handler: Option<EventHandler<CommandEvent>>) -> Self {
        Self { handler }
    }

    pub(crate) fn emit(&self, event: CommandEvent) {
        self.trace(&event);
        if let Some(ref handler) = self.handler {
            handler.handle(event);
        }
    }

    fn trace(&self, event: &CommandEvent) {
        match event {
            CommandEvent::Started(event) => {
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    command = event.command.tracing_representation(),
                    databaseName = event.db.as_str(),
                    commandName = event.command_name.as_str(),
                    requestId = event.request_id,
                    sessionOperation = event.session_operation,
                    driverConnectionId = event.connection.id,
                    serverHost = event.connection.address.host(),
                    serverPort = event.connection.address.port(),
                    "Command started"
                );
            }
            CommandEvent::Succeeded(event) => {
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    reply = event.reply.tracing_representation(),
                    commandName = event.command_name.as_str(),
                    requestId = event.request_id,
                    driverConnectionId = event.connection.id,
                    serverHost = event.connection.address.host(),
                    serverPort = event.connection.address.port(),
                    durationMS = event.duration.as_millis() as u64,
                    "Command succeeded"
                );
            }
            CommandEvent::Failed(event) => {
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    failure = event.failure.tracing_representation(),
                    commandName = event.command_name.as_str(),
                    requestId = event.request_id,
                    driverConnectionId = event.connection.id,
                    serverHost = event.connection.address.host(),
                    serverPort = event.connection.address.port(),
                    durationMS = event.duration.as_millis() as u64,
                    "Command failed"
                );
            }
        }
    }
}
