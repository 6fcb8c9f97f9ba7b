pub mod options;

use std::{fmt::Debug, sync::Arc};

use crate::{
    concern::{ReadConcern, WriteConcern},
    options::{CollectionOptions, DatabaseOptions},
    selection_criteria::ReadPreference,
    Client,
    Collection,
};

/// A handle to one database of the replica set, carrying the read preference and concerns its
/// collections inherit. Obtained from [`Client::database`] or [`Client::database_with_options`].
///
/// Handles are reference counted and cheap to clone, so they can be moved into spawned tasks:
///
/// ```rust
/// # use mongomux::{bson::{doc, Document}, Client, error::Result};
/// # async fn start_workers() -> Result<()> {
/// # let client = Client::with_uri_str("mongodb://example.com/?replicaSet=rs0").await?;
/// let db = client.database("items");
/// for shard in 0..4 {
///     let db = db.clone();
///     tokio::spawn(async move {
///         db.collection::<Document>("events")
///             .insert_one(doc! { "shard": shard })
///             .await
///     });
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

#[derive(Debug)]
struct DatabaseInner {
    client: Client,
    name: String,
    selection_criteria: Option<ReadPreference>,
    read_concern: Option<ReadConcern>,
    write_concern: Option<WriteConcern>,
}

impl Database {
    pub(crate) fn new(client: Client, name: &str, options: Option<DatabaseOptions>) -> Self {
        let options = options.unwrap_or_default();
        let selection_criteria = options
            .selection_criteria
            .or_else(|| client.selection_criteria().cloned());

        let read_concern = options
            .read_concern
            .or_else(|| client.read_concern().cloned());

        let write_concern = options
            .write_concern
            .or_else(|| client.write_concern().cloned());

        Self {
            inner: Arc::new(DatabaseInner {
                client,
                name: name.to_string(),
                selection_criteria,
                read_concern,
                write_concern,
            }),
        }
    }

    /// The client this handle was created from.
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// The database name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The read preference used by this database's collections unless they override it.
    pub fn selection_criteria(&self) -> Option<&ReadPreference> {
        self.inner.selection_criteria.as_ref()
    }

    /// The read concern inherited by this database's collections.
    pub fn read_concern(&self) -> Option<&ReadConcern> {
        self.inner.read_concern.as_ref()
    }

    /// The write concern inherited by this database's collections.
    pub fn write_concern(&self) -> Option<&WriteConcern> {
        self.inner.write_concern.as_ref()
    }

    /// A handle to the collection `name`, inheriting this database's read preference and
    /// concerns. Nothing is sent to the server.
    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        Collection::new(self.clone(), name, None)
    }

    /// Like [`collection`](Self::collection), with `options` taking precedence over the
    /// inherited defaults.
    pub fn collection_with_options<T: Send + Sync>(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Collection<T> {
        Collection::new(self.clone(), name, Some(options))
    }
}
