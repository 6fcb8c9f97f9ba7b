use crate::{
    error::{ErrorKind, Result},
    options::{SessionOptions, TransactionOptions},
    Client,
    ClientSession,
};

use super::{action_impl, option_setters};

impl Client {
    /// Starts a new [`ClientSession`].
    ///
    /// `await` will return [`Result<ClientSession>`].
    pub fn start_session(&self) -> StartSession<'_> {
        StartSession {
            client: self,
            options: None,
        }
    }
}

/// Start a new [`ClientSession`].  Construct with [`Client::start_session`].
#[must_use]
pub struct StartSession<'a> {
    client: &'a Client,
    options: Option<SessionOptions>,
}

impl StartSession<'_> {
    option_setters!(options: SessionOptions;
        /// Default options for transactions started on the session.
        default_transaction_options: TransactionOptions,
        /// Whether reads in the session observe the session's earlier writes. Defaults to true.
        causal_consistency: bool,
    );

    /// Set all options. Overwrites any options set by the individual setters.
    pub fn with_options(mut self, value: impl Into<Option<SessionOptions>>) -> Self {
        self.options = value.into();
        self
    }

    async fn execute(self) -> Result<ClientSession> {
        if self.client.is_shut_down() {
            return Err(ErrorKind::Shutdown.into());
        }
        Ok(ClientSession::new(self.client.clone(), self.options).await)
    }
}

action_impl!('a, ['a] StartSession<'a>, Result<ClientSession>);
