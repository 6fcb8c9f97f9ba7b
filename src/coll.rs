pub mod options;

use std::{fmt, fmt::Debug, str::FromStr, sync::Arc};

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};

use self::options::CollectionOptions;
use crate::{
    concern::{ReadConcern, WriteConcern},
    error::{Error, Result},
    selection_criteria::ReadPreference,
    Client,
    Database,
};

/// A handle to one collection, typed by the documents it holds. Obtained from
/// [`Database::collection`] or [`Database::collection_with_options`].
///
/// `T` only needs to implement `Serialize` for inserts and `DeserializeOwned` for reads; use
/// [`Document`](crate::bson::Document) for untyped access. Handles are reference counted and can
/// be shared between tasks.
///
/// ```rust
/// # use mongomux::{bson::doc, error::Result, Client};
/// # async fn run() -> Result<()> {
/// # let client = Client::with_uri_str("mongodb://example.com/?replicaSet=rs0").await?;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Deserialize, Serialize)]
/// struct Item {
///     sku: String,
///     qty: i32,
/// }
///
/// let items = client.database("shop").collection::<Item>("items");
/// items.insert_one(Item { sku: "a-1".into(), qty: 3 }).await?;
/// let low = items.find(doc! { "qty": 0 }).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Collection<T>
where
    T: Send + Sync,
{
    inner: Arc<CollectionInner>,
    _phantom: std::marker::PhantomData<fn() -> T>,
}

// No value of `T` is stored, so `T: Clone` is not required.
impl<T> Clone for Collection<T>
where
    T: Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _phantom: Default::default(),
        }
    }
}

#[derive(Debug)]
struct CollectionInner {
    client: Client,
    db: Database,
    name: String,
    selection_criteria: Option<ReadPreference>,
    read_concern: Option<ReadConcern>,
    write_concern: Option<WriteConcern>,
}

impl<T> Collection<T>
where
    T: Send + Sync,
{
    pub(crate) fn new(db: Database, name: &str, options: Option<CollectionOptions>) -> Self {
        let options = options.unwrap_or_default();
        let selection_criteria = options
            .selection_criteria
            .or_else(|| db.selection_criteria().cloned());

        let read_concern = options.read_concern.or_else(|| db.read_concern().cloned());

        let write_concern = options
            .write_concern
            .or_else(|| db.write_concern().cloned());

        Self {
            inner: Arc::new(CollectionInner {
                client: db.client().clone(),
                db,
                name: name.to_string(),
                selection_criteria,
                read_concern,
                write_concern,
            }),
            _phantom: Default::default(),
        }
    }

    /// The same collection, viewed with document type `U`.
    pub fn clone_with_type<U: Send + Sync>(&self) -> Collection<U> {
        Collection {
            inner: self.inner.clone(),
            _phantom: Default::default(),
        }
    }

    /// The client this handle was created from.
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// The collection name, without the database.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The `db.coll` namespace of this collection.
    pub fn namespace(&self) -> Namespace {
        Namespace {
            db: self.inner.db.name().into(),
            coll: self.name().into(),
        }
    }

    /// The read preference used when an operation sets none.
    pub fn selection_criteria(&self) -> Option<&ReadPreference> {
        self.inner.selection_criteria.as_ref()
    }

    /// The read concern used outside transactions when an operation sets none.
    pub fn read_concern(&self) -> Option<&ReadConcern> {
        self.inner.read_concern.as_ref()
    }

    /// The write concern used outside transactions when an operation sets none.
    pub fn write_concern(&self) -> Option<&WriteConcern> {
        self.inner.write_concern.as_ref()
    }
}

/// A fully qualified collection name, `db.coll`. The collection part may itself contain dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// The name of the database associated with this namespace.
    pub db: String,

    /// The name of the collection this namespace corresponds to.
    pub coll: String,
}

impl Namespace {
    /// Construct a `Namespace` with the given database and collection.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    pub(crate) fn from_str(s: &str) -> Option<Self> {
        let (db, coll) = s.split_once('.')?;
        if db.is_empty() || coll.is_empty() {
            return None;
        }
        Some(Self::new(db, coll))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::from_str(&s)
            .ok_or_else(|| D::Error::custom("Missing one or more fields in namespace"))
    }
}

impl Serialize for Namespace {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_str(s)
            .ok_or_else(|| Error::invalid_argument("Missing one or more fields in namespace"))
    }
}
