use crate::{
    action::{action_impl, AbortTransaction, CommitTransaction, StartTransaction},
    client::options::TransactionOptions,
    error::{Error, Result},
    operation::{self, Operation},
    sdam::SelectionCriteria,
    BoxFuture,
    ClientSession,
};

use super::TransactionState;

impl ClientSession {
    fn start_transaction_impl(&mut self, options: Option<TransactionOptions>) -> Result<()> {
        if self.in_transaction() {
            return Err(Error::invalid_operation("transaction already in progress"));
        }

        let mut options = match options {
            Some(mut options) => {
                if let Some(defaults) = self.default_transaction_options() {
                    merge_options!(
                        defaults,
                        options,
                        [
                            read_concern,
                            write_concern,
                            selection_criteria,
                            max_commit_time
                        ]
                    );
                }
                Some(options)
            }
            None => self.default_transaction_options().cloned(),
        };
        resolve_options!(
            self.client,
            options,
            [read_concern, write_concern, selection_criteria]
        );

        if let Some(ref options) = options {
            if !options
                .write_concern
                .as_ref()
                .map(|wc| wc.is_acknowledged())
                .unwrap_or(true)
            {
                return Err(Error::configuration(
                    "transactions do not support unacknowledged write concerns",
                ));
            }
        }

        self.increment_txn_number();
        self.transaction.start(options);
        Ok(())
    }

    fn pinned_criteria(&self) -> Option<SelectionCriteria> {
        self.transaction
            .pinned
            .clone()
            .map(SelectionCriteria::Pinned)
    }

    fn commit_operation(&self) -> operation::CommitTransaction {
        let options = self.transaction.options.as_ref();
        operation::CommitTransaction::new(
            options.and_then(|o| o.write_concern.clone()),
            options.and_then(|o| o.max_commit_time),
            self.pinned_criteria(),
            None,
        )
    }

    /// Sends `commitTransaction`, re-sending it once with a majority write concern if the first
    /// attempt fails with a retryable write error.
    async fn run_commit(&mut self) -> Result<()> {
        let client = self.client.clone();
        let mut commit = self.commit_operation();
        let result = client.execute_operation(&mut commit, Some(&mut *self)).await;
        match result {
            Err(error) if error.is_write_retryable() => {
                tracing::debug!(%error, "retrying commitTransaction");
                commit.update_for_retry();
                client.execute_operation(&mut commit, Some(self)).await
            }
            result => result,
        }
    }

    async fn run_abort(&mut self) {
        let client = self.client.clone();
        let options = self.transaction.options.as_ref();
        let mut abort = operation::AbortTransaction::new(
            options.and_then(|o| o.write_concern.clone()),
            self.pinned_criteria(),
            None,
        );
        self.transaction.abort();
        // Errors returned from running an abortTransaction command are ignored.
        if let Err(error) = client.execute_operation(&mut abort, Some(self)).await {
            tracing::debug!(%error, "abortTransaction failed");
        }
    }

    /// Ends this session, aborting its transaction if one is active and returning the underlying
    /// server session to the client's pool.
    ///
    /// Dropping a `ClientSession` has the same effect, performed on a background task.
    pub async fn end_session(mut self) {
        match self.transaction.state {
            TransactionState::Starting => self.transaction.abort(),
            TransactionState::InProgress => self.run_abort().await,
            _ => {}
        }
        self.ended = true;
        self.client
            .check_in_server_session(self.server_session.clone())
            .await;
    }
}

impl ClientSession {
    /// Runs `callback` in a new transaction started with the session's default transaction
    /// options. Equivalent to `self.start_transaction().and_run(context, callback)`.
    pub async fn with_transaction<R, C, F>(&mut self, context: C, callback: F) -> Result<R>
    where
        F: for<'b> FnOnce(&'b mut ClientSession, &'b mut C) -> BoxFuture<'b, Result<R>>,
    {
        self.start_transaction().and_run(context, callback).await
    }
}

impl StartTransaction<'_> {
    async fn execute(self) -> Result<()> {
        self.session.start_transaction_impl(self.options)
    }

    /// Starts a transaction, runs the given callback, and commits the transaction if the callback
    /// succeeds. If the callback fails, the transaction is aborted and the callback's error is
    /// returned. The transaction is not retried.
    ///
    /// If the callback itself commits or aborts the transaction, nothing more is done once it
    /// returns.
    ///
    /// Because the callback returns a future, the rust closure borrowing rules for captured values
    /// can be overly restrictive.  As a convenience, `and_run` accepts a context argument that
    /// will be passed to the callback along with the session:
    ///
    /// ```no_run
    /// # use mongomux::{bson::{doc, Document}, error::Result, Client};
    /// # use futures::FutureExt;
    /// # async fn wrapper() -> Result<()> {
    /// # let client = Client::with_uri_str("mongodb://example.com/?replicaSet=rs0").await?;
    /// # let mut session = client.start_session().await?;
    /// let coll = client.database("mydb").collection::<Document>("mycoll");
    /// let my_data = "my data".to_string();
    /// session.start_transaction().and_run(
    ///     (&coll, &my_data),
    ///     |session, (coll, my_data)| async move {
    ///         coll.insert_one(doc! { "data": *my_data }).session(session).await
    ///     }.boxed()
    /// ).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn and_run<R, C, F>(self, mut context: C, callback: F) -> Result<R>
    where
        F: for<'b> FnOnce(&'b mut ClientSession, &'b mut C) -> BoxFuture<'b, Result<R>>,
    {
        let session = self.session;
        session.start_transaction_impl(self.options)?;

        match callback(&mut *session, &mut context).await {
            Ok(value) => {
                if session.in_transaction() {
                    session.commit_transaction().await?;
                }
                Ok(value)
            }
            Err(error) => {
                if session.in_transaction() {
                    session.abort_transaction().await?;
                }
                Err(error)
            }
        }
    }
}

action_impl!('a, ['a] StartTransaction<'a>, Result<()>);

impl CommitTransaction<'_> {
    async fn execute(self) -> Result<()> {
        match self.session.transaction.state {
            TransactionState::None => Err(Error::invalid_operation("no transaction started")),
            TransactionState::Aborted => Err(Error::invalid_operation(
                "cannot call commitTransaction after calling abortTransaction",
            )),
            TransactionState::Starting => {
                self.session.transaction.commit(false);
                Ok(())
            }
            TransactionState::InProgress => {
                self.session.transaction.commit(true);
                self.session.run_commit().await
            }
            TransactionState::Committed {
                data_committed: true,
            } => self.session.run_commit().await,
            TransactionState::Committed {
                data_committed: false,
            } => Ok(()),
        }
    }
}

action_impl!('a, ['a] CommitTransaction<'a>, Result<()>);

impl AbortTransaction<'_> {
    async fn execute(self) -> Result<()> {
        match self.session.transaction.state {
            TransactionState::None => Err(Error::invalid_operation("no transaction started")),
            TransactionState::Committed { .. } => Err(Error::invalid_operation(
                "cannot call abortTransaction after calling commitTransaction",
            )),
            TransactionState::Aborted => Err(Error::invalid_operation(
                "cannot call abortTransaction twice",
            )),
            TransactionState::Starting => {
                self.session.transaction.abort();
                Ok(())
            }
            TransactionState::InProgress => {
                self.session.run_abort().await;
                Ok(())
            }
        }
    }
}

action_impl!('a, ['a] AbortTransaction<'a>, Result<()>);
