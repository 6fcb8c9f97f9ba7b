use std::borrow::Borrow;

use serde::Serialize;
use tokio::time::Instant;

use crate::{
    bson::Document,
    coll::options::InsertOneOptions,
    error::Result,
    operation::Insert as Op,
    options::WriteConcern,
    results::InsertOneResult,
    ClientSession,
    Collection,
};

use super::{action_impl, deadline_setters, option_setters, CollRef};

impl<T: Serialize + Send + Sync> Collection<T> {
    /// Inserts `doc` into the collection. An `_id` is generated for documents that lack one.
    ///
    /// Note that either an owned or borrowed value can be inserted here, so the input document
    /// does not need to be cloned to be passed in.
    ///
    /// An insert is only retried if it never reached the server.
    ///
    /// `await` will return [`Result<InsertOneResult>`].
    pub fn insert_one(&self, doc: impl Borrow<T>) -> InsertOne<'_> {
        InsertOne {
            coll: CollRef::new(self),
            doc: crate::bson::to_document(doc.borrow()).map_err(Into::into),
            options: None,
            session: None,
            deadline: None,
        }
    }
}

/// Inserts a document into a collection.  Construct with [`Collection::insert_one`].
#[must_use]
pub struct InsertOne<'a> {
    coll: CollRef<'a>,
    doc: Result<Document>,
    options: Option<InsertOneOptions>,
    session: Option<&'a mut ClientSession>,
    deadline: Option<Instant>,
}

impl<'a> InsertOne<'a> {
    option_setters! { options: InsertOneOptions;
        write_concern: WriteConcern,
    }

    deadline_setters!();

    /// Use the provided session when running the operation.
    pub fn session(mut self, value: impl Into<&'a mut ClientSession>) -> Self {
        self.session = Some(value.into());
        self
    }

    async fn execute(mut self) -> Result<InsertOneResult> {
        resolve_write_concern_with_session!(self.coll, self.options, self.session.as_deref());

        let doc = self.doc?;
        let mut insert = Op::new(
            self.coll.namespace(),
            doc,
            self.options.and_then(|o| o.write_concern),
            self.deadline,
        );
        self.coll
            .client()
            .execute_operation(&mut insert, self.session)
            .await
    }
}

action_impl!('a, ['a] InsertOne<'a>, Result<InsertOneResult>);
