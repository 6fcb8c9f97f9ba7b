use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::{
    bson::{from_document, Document},
    coll::options::FindOptions,
    error::Result,
    operation::Find as Op,
    options::{ReadConcern, ReadPreference},
    ClientSession,
    Collection,
};

use super::{action_impl, deadline_setters, option_setters};

impl<T: DeserializeOwned + Send + Sync> Collection<T> {
    /// Finds the documents in the collection matching `filter`. Only the first batch returned by
    /// the server is read, so use [`limit`](Find::limit) for large result sets.
    ///
    /// `await` will return [`Result<Vec<T>>`](crate::error::Result).
    pub fn find(&self, filter: Document) -> Find<'_, T> {
        Find {
            coll: self,
            filter,
            options: None,
            session: None,
            deadline: None,
        }
    }

    /// Finds a single document in the collection matching `filter`.
    ///
    /// `await` will return [`Result<Option<T>>`](crate::error::Result).
    pub fn find_one(&self, filter: Document) -> FindOne<'_, T> {
        FindOne {
            inner: self.find(filter).limit(-1),
        }
    }
}

/// Finds the documents in a collection matching a filter.  Construct with [`Collection::find`].
#[must_use]
pub struct Find<'a, T: Send + Sync> {
    coll: &'a Collection<T>,
    filter: Document,
    options: Option<FindOptions>,
    session: Option<&'a mut ClientSession>,
    deadline: Option<Instant>,
}

impl<'a, T: Send + Sync> Find<'a, T> {
    option_setters! { options: FindOptions;
        /// The maximum number of documents to return. A negative value returns at most that many
        /// in a single batch.
        limit: i64,
        selection_criteria: ReadPreference,
        read_concern: ReadConcern,
    }

    deadline_setters!();

    /// Use the provided session when running the operation.
    pub fn session(mut self, value: impl Into<&'a mut ClientSession>) -> Self {
        self.session = Some(value.into());
        self
    }
}

impl<T: DeserializeOwned + Send + Sync> Find<'_, T> {
    async fn execute(mut self) -> Result<Vec<T>> {
        resolve_options!(self.coll, self.options, [selection_criteria]);
        resolve_read_concern_with_session!(self.coll, self.options, self.session.as_deref());

        let options = self.options.unwrap_or_default();
        let mut find = Op::new(
            self.coll.namespace(),
            self.filter,
            options.limit,
            options.selection_criteria.map(Into::into),
            options.read_concern,
            self.deadline,
        );
        let batch = self
            .coll
            .client()
            .execute_operation(&mut find, self.session)
            .await?;
        batch
            .into_iter()
            .map(|doc| from_document(doc).map_err(Into::into))
            .collect()
    }
}

action_impl!('a, ['a, T: DeserializeOwned + Send + Sync + 'a] Find<'a, T>, Result<Vec<T>>);

/// Finds a single document in a collection matching a filter.  Construct with
/// [`Collection::find_one`].
#[must_use]
pub struct FindOne<'a, T: Send + Sync> {
    inner: Find<'a, T>,
}

impl<'a, T: Send + Sync> FindOne<'a, T> {
    /// The read preference for the operation.
    pub fn selection_criteria(self, value: impl Into<ReadPreference>) -> Self {
        Self {
            inner: self.inner.selection_criteria(value),
        }
    }

    /// The read concern for the operation. Ignored inside a transaction.
    pub fn read_concern(self, value: impl Into<ReadConcern>) -> Self {
        Self {
            inner: self.inner.read_concern(value),
        }
    }

    /// Fails the operation with a `TimeExceeded` error if it has not completed by `deadline`.
    pub fn deadline(self, deadline: impl Into<Instant>) -> Self {
        Self {
            inner: self.inner.deadline(deadline),
        }
    }

    /// Like [`deadline`](Self::deadline), relative to now.
    pub fn timeout(self, timeout: std::time::Duration) -> Self {
        Self {
            inner: self.inner.timeout(timeout),
        }
    }

    /// Use the provided session when running the operation.
    pub fn session(self, value: impl Into<&'a mut ClientSession>) -> Self {
        Self {
            inner: self.inner.session(value),
        }
    }
}

impl<T: DeserializeOwned + Send + Sync> FindOne<'_, T> {
    async fn execute(self) -> Result<Option<T>> {
        Ok(self.inner.execute().await?.into_iter().next())
    }
}

action_impl!('a, ['a, T: DeserializeOwned + Send + Sync + 'a] FindOne<'a, T>, Result<Option<T>>);
