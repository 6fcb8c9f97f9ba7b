use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    client::options::{ClientOptions, TestOptions},
    event::{
        command::{CommandEvent, CommandStartedEvent},
        EventHandler,
    },
    hello::{LEGACY_HELLO_COMMAND_NAME, REPL_SET_GET_STATUS_COMMAND_NAME},
    runtime,
    sdam::{TopologyDescription, TopologyWatcher},
};

/// Parses `uri` and shortens every timer so that tests against the mock server run quickly.
pub(crate) fn client_options(uri: &str) -> ClientOptions {
    let mut options = ClientOptions::parse(uri).unwrap();
    options.heartbeat_freq.get_or_insert(Duration::from_millis(500));
    options.retry_delay.get_or_insert(Duration::from_millis(50));
    options.max_delay.get_or_insert(Duration::from_millis(200));
    options
        .server_selection_timeout
        .get_or_insert(Duration::from_secs(5));
    options.test_options = Some(TestOptions {
        min_heartbeat_freq: Some(Duration::from_millis(50)),
    });
    options
}

/// Waits until `predicate` holds for the published description. Returns whether it did within
/// `timeout`.
pub(crate) async fn wait_for_topology(
    watcher: &mut TopologyWatcher,
    timeout: Duration,
    predicate: impl Fn(&TopologyDescription) -> bool,
) -> bool {
    runtime::timeout(timeout, async {
        while !predicate(&watcher.description()) {
            watcher.wait_for_update(Duration::from_millis(100)).await;
        }
    })
    .await
    .is_ok()
}

/// Collects events delivered to the handler it hands out.
#[derive(Clone, Debug)]
pub(crate) struct EventBuffer<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + Sync + 'static> EventBuffer<T> {
    pub(crate) fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn handler(&self) -> EventHandler<T> {
        let events = self.events.clone();
        EventHandler::callback(move |event| events.lock().unwrap().push(event))
    }

    pub(crate) fn all(&self) -> Vec<T> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventBuffer<CommandEvent> {
    /// The started events for application commands, excluding handshakes.
    pub(crate) fn started(&self) -> Vec<CommandStartedEvent> {
        self.all()
            .into_iter()
            .filter_map(|event| match event {
                CommandEvent::Started(event)
                    if !event
                        .command_name
                        .eq_ignore_ascii_case(LEGACY_HELLO_COMMAND_NAME)
                        && event.command_name != REPL_SET_GET_STATUS_COMMAND_NAME =>
                {
                    Some(event)
                }
                _ => None,
            })
            .collect()
    }

    /// Names of the application commands started so far.
    pub(crate) fn started_names(&self) -> Vec<String> {
        self.started()
            .into_iter()
            .map(|event| event.command_name)
            .collect()
    }

    /// The started events for commands named `name`.
    pub(crate) fn started_named(&self, name: &str) -> Vec<CommandStartedEvent> {
        self.started()
            .into_iter()
            .filter(|event| event.command_name == name)
            .collect()
    }
}
