use tokio::time::Instant;

use crate::{
    bson::Document,
    coll::options::CountOptions,
    error::Result,
    operation::CountDocuments as Op,
    options::{ReadConcern, ReadPreference},
    ClientSession,
    Collection,
};

use super::{action_impl, deadline_setters, option_setters, CollRef};

impl<T: Send + Sync> Collection<T> {
    /// Gets the number of documents matching `filter`.
    ///
    /// Note that this method returns an accurate count.
    ///
    /// `await` will return [`Result<u64>`](crate::error::Result).
    pub fn count_documents(&self, filter: Document) -> CountDocuments<'_> {
        CountDocuments {
            coll: CollRef::new(self),
            filter,
            options: None,
            session: None,
            deadline: None,
        }
    }
}

/// Gets the number of documents matching a filter.  Construct with
/// [`Collection::count_documents`].
#[must_use]
pub struct CountDocuments<'a> {
    coll: CollRef<'a>,
    filter: Document,
    options: Option<CountOptions>,
    session: Option<&'a mut ClientSession>,
    deadline: Option<Instant>,
}

impl<'a> CountDocuments<'a> {
    option_setters! { options: CountOptions;
        skip: u64,
        limit: u64,
        selection_criteria: ReadPreference,
        read_concern: ReadConcern,
    }

    deadline_setters!();

    /// Use the provided session when running the operation.
    pub fn session(mut self, value: impl Into<&'a mut ClientSession>) -> Self {
        self.session = Some(value.into());
        self
    }

    async fn execute(mut self) -> Result<u64> {
        resolve_options!(self.coll, self.options, [selection_criteria]);
        resolve_read_concern_with_session!(self.coll, self.options, self.session.as_deref());

        let options = self.options.unwrap_or_default();
        let mut count = Op::new(
            self.coll.namespace(),
            self.filter,
            options.skip,
            options.limit,
            options.selection_criteria.map(Into::into),
            options.read_concern,
            self.deadline,
        )?;
        self.coll
            .client()
            .execute_operation(&mut count, self.session)
            .await
    }
}

action_impl!('a, ['a] CountDocuments<'a>, Result<u64>);
