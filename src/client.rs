mod executor;
pub mod options;
pub mod session;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    concern::{ReadConcern, WriteConcern},
    db::{options::DatabaseOptions, Database},
    error::Result,
    operation::EndSessions,
    options::ClientOptions,
    sdam::{SelectionCriteria, Topology, TopologyDescription, TopologyWatcher},
    selection_criteria::ReadPreference,
};
use session::{ServerSession, ServerSessionPool};

/// This is the main entry point for the API. A `Client` is used to connect to a MongoDB replica
/// set. It monitors every member of the deployment in the background, keeps one multiplexed
/// connection open per member, and routes each operation to a suitable member.
///
/// `Client` uses [`std::sync::Arc`](https://doc.rust-lang.org/std/sync/struct.Arc.html) internally,
/// so it can safely be shared across threads or async tasks. For example:
///
/// ```rust
/// # use mongomux::{bson::doc, Client, error::Result};
/// #
/// # async fn start_workers() -> Result<()> {
/// let client = Client::with_uri_str("mongodb://example.com/?replicaSet=rs0").await?;
///
/// for i in 0..5 {
///     let client_ref = client.clone();
///
///     tokio::task::spawn(async move {
///         let collection = client_ref.database("items").collection::<mongomux::bson::Document>(&format!("coll{}", i));
///
///         // Do something with the collection
///     });
/// }
/// #
/// # Ok(())
/// # }
/// ```
///
/// ## Shutdown
/// The background tasks stop when the last handle to the client is dropped. Call
/// [`Client::shutdown`] to also release the server sessions held by the client and to wait for
/// the connections to close.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[allow(dead_code, unreachable_code, clippy::diverging_sub_expression)]
const _: fn() = || {
    fn assert_send<T: Send>(_t: T) {}
    fn assert_sync<T: Sync>(_t: T) {}

    let _c: super::Client = todo!();
    assert_send(_c);
    assert_sync(_c);
};

#[derive(Debug)]
struct ClientInner {
    topology: Topology,
    options: ClientOptions,
    session_pool: ServerSessionPool,
    shutdown: AtomicBool,
}

impl Client {
    /// Creates a new `Client` connected to the deployment specified by `uri`. `uri` must be a
    /// valid MongoDB connection string.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn with_uri_str(uri: impl AsRef<str>) -> Result<Self> {
        let options = ClientOptions::parse(uri.as_ref())?;

        Client::with_options(options)
    }

    /// Creates a new `Client` connected to the deployment specified by `options`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        options.validate()?;

        let inner = Arc::new(ClientInner {
            topology: Topology::new(options.clone()),
            session_pool: ServerSessionPool::new(),
            options,
            shutdown: AtomicBool::new(false),
        });
        Ok(Self { inner })
    }

    /// Gets the default read preference the `Client` uses for operations.
    pub fn selection_criteria(&self) -> Option<&ReadPreference> {
        self.inner.options.selection_criteria.as_ref()
    }

    /// Gets the default read concern the `Client` uses for operations.
    pub fn read_concern(&self) -> Option<&ReadConcern> {
        self.inner.options.read_concern.as_ref()
    }

    /// Gets the default write concern the `Client` uses for operations.
    pub fn write_concern(&self) -> Option<&WriteConcern> {
        self.inner.options.write_concern.as_ref()
    }

    /// Gets a handle to a database specified by `name` in the deployment the `Client` is connected
    /// to. The `Database` options (e.g. read preference and write concern) will default to those of
    /// the `Client`.
    ///
    /// This method does not send or receive anything across the wire to the database, so it can be
    /// used repeatedly without incurring any costs from I/O.
    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name, None)
    }

    /// Gets a handle to a database specified by `name` in the deployment the `Client` is connected
    /// to. Operations done with this `Database` will use the options specified by `options` by
    /// default and will otherwise default to those of the `Client`.
    pub fn database_with_options(&self, name: &str, options: DatabaseOptions) -> Database {
        Database::new(self.clone(), name, Some(options))
    }

    /// Gets a handle to the default database specified in the `ClientOptions` or MongoDB connection
    /// string used to construct this `Client`.
    ///
    /// If no default database was specified, `None` will be returned.
    pub fn default_database(&self) -> Option<Database> {
        self.inner
            .options
            .default_database
            .as_ref()
            .map(|db_name| self.database(db_name))
    }

    /// Returns a watcher that observes every description of the deployment published by the
    /// client's monitors.
    pub fn subscribe_to_topology_changes(&self) -> TopologyWatcher {
        self.inner.topology.watch()
    }

    /// The client's current view of the deployment.
    pub fn topology_description(&self) -> TopologyDescription {
        self.inner.topology.watch().description()
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub(crate) fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Whether `other` is a handle to this same client.
    pub(crate) fn ptr_eq(&self, other: &Client) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) async fn check_out_server_session(&self) -> ServerSession {
        self.inner.session_pool.check_out().await
    }

    pub(crate) async fn check_in_server_session(&self, session: ServerSession) {
        self.inner.session_pool.check_in(session).await;
    }

    #[cfg(test)]
    pub(crate) async fn is_session_checked_in(&self, id: &crate::bson::Document) -> bool {
        self.inner.session_pool.contains(id).await
    }

    /// Sends `endSessions` for every pooled server session. Failures are ignored.
    pub(crate) async fn end_all_sessions(&self) {
        // The maximum number of session IDs that should be sent in a single endSessions command.
        const MAX_END_SESSIONS_BATCH_SIZE: usize = 10_000;

        let criteria = SelectionCriteria::from(ReadPreference::PrimaryPreferred);
        if !matches!(
            self.topology_description().select_server(&criteria),
            Ok(Some(_))
        ) {
            return;
        }

        let session_ids = self.inner.session_pool.drain().await;
        for chunk in session_ids.chunks(MAX_END_SESSIONS_BATCH_SIZE) {
            let mut end_sessions = EndSessions::new(chunk.to_vec());
            let _ = self.execute_operation(&mut end_sessions, None).await;
        }
    }

    /// Marks the client as shut down, ends its sessions and stops monitoring.
    pub(crate) async fn shutdown_impl(&self) {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        self.end_all_sessions().await;
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.topology.shutdown().await;
    }
}
