use crate::Client;

use super::action_impl;

impl Client {
    /// Shut down this `Client`, ending the server sessions it pooled, stopping the monitors and
    /// closing every connection. Using this method is not required under most circumstances
    /// (resources will be cleaned up in the background when dropped) but can be needed when
    /// precise control of lifespan timing is required.
    ///
    /// Sessions still held by the application are not ended by the server until they time out.
    ///
    /// Calling any methods on clones of this `Client` or derived handles after this will return
    /// errors.
    ///
    /// ```rust
    /// # use mongomux::{Client, error::Result};
    /// # async fn run() -> Result<()> {
    /// let client = Client::with_uri_str("mongodb://example.com/?replicaSet=rs0").await?;
    /// client.shutdown().await;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// `await` will return `()`.
    pub fn shutdown(self) -> Shutdown {
        Shutdown { client: self }
    }
}

/// Shut down this `Client`.  Construct with [`Client::shutdown`].
#[must_use]
pub struct Shutdown {
    client: Client,
}

impl Shutdown {
    async fn execute(self) {
        self.client.shutdown_impl().await;
    }
}

action_impl!('static, [] Shutdown, ());
