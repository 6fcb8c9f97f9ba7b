use std::time::Duration;

use crate::{
    client::session::ClientSession,
    concern::{ReadConcern, WriteConcern},
    options::TransactionOptions,
    selection_criteria::ReadPreference,
};

use super::option_setters;

impl ClientSession {
    /// Starts a new transaction on this session.  If no options are set, the session's
    /// `defaultTransactionOptions` will be used, falling back to the client's defaults. This session
    /// must be passed into each operation within the transaction; otherwise, the operation will be
    /// executed outside of the transaction.
    ///
    /// Errors returned from operations executed within a transaction may include a
    /// [`crate::error::TRANSIENT_TRANSACTION_ERROR`] label. This label indicates that the entire
    /// transaction can be retried with a reasonable expectation that it will succeed.
    ///
    /// ```rust
    /// # use mongomux::{bson::{doc, Document}, error::Result, Client, ClientSession};
    /// #
    /// # async fn do_stuff() -> Result<()> {
    /// # let client = Client::with_uri_str("mongodb://example.com/?replicaSet=rs0").await?;
    /// # let coll = client.database("foo").collection::<Document>("bar");
    /// # let mut session = client.start_session().await?;
    /// session.start_transaction().await?;
    /// let result = coll.insert_one(doc! { "x": 1 }).session(&mut session).await?;
    /// session.commit_transaction().await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// `await` will return [`Result<()>`](crate::error::Result).
    pub fn start_transaction(&mut self) -> StartTransaction<'_> {
        StartTransaction {
            session: self,
            options: None,
        }
    }

    /// Commits the transaction that is currently active on this session. Committing a transaction
    /// that sent no statements succeeds without contacting the server. Committing again after a
    /// commit re-sends the commit.
    ///
    /// This method may return an error with a [`crate::error::UNKNOWN_TRANSACTION_COMMIT_RESULT`]
    /// label. This label indicates that it is unknown whether the commit has satisfied the write
    /// concern associated with the transaction. If an error with this label is returned, it is
    /// safe to retry the commit until the write concern is satisfied or an error without the label
    /// is returned.
    ///
    /// `await` will return [`Result<()>`](crate::error::Result).
    pub fn commit_transaction(&mut self) -> CommitTransaction<'_> {
        CommitTransaction { session: self }
    }

    /// Aborts the transaction that is currently active on this session. Any open transaction will
    /// be aborted automatically in the `Drop` implementation of `ClientSession`.
    ///
    /// `await` will return [`Result<()>`](crate::error::Result).
    pub fn abort_transaction(&mut self) -> AbortTransaction<'_> {
        AbortTransaction { session: self }
    }
}

/// Start a new transaction.  Construct with [`ClientSession::start_transaction`].
#[must_use]
pub struct StartTransaction<'a> {
    pub(crate) session: &'a mut ClientSession,
    pub(crate) options: Option<TransactionOptions>,
}

impl StartTransaction<'_> {
    option_setters! { options: TransactionOptions;
        /// The read concern of the transaction's statements.
        read_concern: ReadConcern,
        /// The write concern of the commit or abort.
        write_concern: WriteConcern,
        /// The read preference of the transaction's statements.
        selection_criteria: ReadPreference,
        /// The `maxTimeMS` sent with the commit.
        max_commit_time: Duration,
    }

    /// Set all options. Overwrites any options set by the individual setters.
    pub fn with_options(mut self, value: impl Into<Option<TransactionOptions>>) -> Self {
        self.options = value.into();
        self
    }
}

/// Commits a currently-active transaction.  Construct with [`ClientSession::commit_transaction`].
#[must_use]
pub struct CommitTransaction<'a> {
    pub(crate) session: &'a mut ClientSession,
}

/// Abort the currently active transaction on a session.  Construct with
/// [`ClientSession::abort_transaction`].
#[must_use]
pub struct AbortTransaction<'a> {
    pub(crate) session: &'a mut ClientSession,
}
