use tokio::time::Instant;

use crate::{
    bson::Document,
    coll::options::DeleteOptions,
    error::Result,
    operation::Delete as Op,
    options::WriteConcern,
    results::DeleteResult,
    ClientSession,
    Collection,
};

use super::{action_impl, deadline_setters, option_setters, CollRef};

impl<T: Send + Sync> Collection<T> {
    /// Deletes up to one document found matching `query`.
    ///
    /// `await` will return [`Result<DeleteResult>`](crate::error::Result).
    pub fn delete_one(&self, query: Document) -> Delete<'_> {
        Delete {
            coll: CollRef::new(self),
            query,
            limit: Some(1),
            options: None,
            session: None,
            deadline: None,
        }
    }

    /// Deletes all documents stored in the collection matching `query`.
    ///
    /// `await` will return [`Result<DeleteResult>`](crate::error::Result).
    pub fn delete_many(&self, query: Document) -> Delete<'_> {
        Delete {
            coll: CollRef::new(self),
            query,
            limit: None,
            options: None,
            session: None,
            deadline: None,
        }
    }
}

/// Deletes documents matching a filter.  Construct with [`Collection::delete_one`] or
/// [`Collection::delete_many`].
#[must_use]
pub struct Delete<'a> {
    coll: CollRef<'a>,
    query: Document,
    limit: Option<u32>,
    options: Option<DeleteOptions>,
    session: Option<&'a mut ClientSession>,
    deadline: Option<Instant>,
}

impl<'a> Delete<'a> {
    option_setters! { options: DeleteOptions;
        write_concern: WriteConcern,
    }

    deadline_setters!();

    /// Use the provided session when running the operation.
    pub fn session(mut self, value: impl Into<&'a mut ClientSession>) -> Self {
        self.session = Some(value.into());
        self
    }

    async fn execute(mut self) -> Result<DeleteResult> {
        resolve_write_concern_with_session!(self.coll, self.options, self.session.as_deref());

        let mut delete = Op::new(
            self.coll.namespace(),
            self.query,
            self.limit,
            self.options.and_then(|o| o.write_concern),
            self.deadline,
        );
        self.coll
            .client()
            .execute_operation(&mut delete, self.session)
            .await
    }
}

action_impl!('a, ['a] Delete<'a>, Result<DeleteResult>);
