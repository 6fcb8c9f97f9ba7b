//! This crate contains the client core for talking to a MongoDB replica set over the OP_MSG
//! wire protocol. It multiplexes concurrent requests over a small number of connections per
//! member, keeps track of the replica set as it changes, selects members according to read
//! preferences, and runs causally consistent sessions and multi-statement transactions.
//!
//! # Example Usage
//!
//! ## Connecting to a replica set
//! ```no_run
//! # async fn foo() -> mongomux::error::Result<()> {
//! use mongomux::{options::ClientOptions, Client};
//!
//! // Parse a connection string into an options struct.
//! let mut client_options =
//!     ClientOptions::parse("mongodb://db1.example.com:27017/?replicaSet=rs0")?;
//!
//! // Manually set an option.
//! client_options.app_name = Some("My App".to_string());
//!
//! // Get a handle to the deployment.
//! let client = Client::with_options(client_options)?;
//! # Ok(()) }
//! ```
//!
//! ## Inserting and finding documents
//! ```no_run
//! # async fn foo() -> mongomux::error::Result<()> {
//! # let client = mongomux::Client::with_uri_str("mongodb://example.com/?replicaSet=rs0").await?;
//! use mongomux::bson::{doc, Document};
//!
//! let collection = client.database("mydb").collection::<Document>("books");
//! collection
//!     .insert_one(doc! { "title": "1984", "author": "George Orwell" })
//!     .await?;
//!
//! for book in collection.find(doc! { "author": "George Orwell" }).await? {
//!     println!("{}", book);
//! }
//! # Ok(()) }
//! ```
//!
//! A [`Collection`] can be parameterized with any type that implements the `Serialize` and
//! `Deserialize` traits from the [`serde`](https://serde.rs/) crate, not just `Document`.
//!
//! ## Reading from secondaries
//! ```no_run
//! # async fn foo() -> mongomux::error::Result<()> {
//! # let client = mongomux::Client::with_uri_str("mongodb://example.com/?replicaSet=rs0").await?;
//! use std::time::Duration;
//!
//! use mongomux::{bson::{doc, Document}, options::ReadPreference};
//!
//! let count = client
//!     .database("mydb")
//!     .collection::<Document>("books")
//!     .count_documents(doc! {})
//!     .selection_criteria(ReadPreference::SecondaryPreferred)
//!     .timeout(Duration::from_secs(2))
//!     .await?;
//! # Ok(()) }
//! ```
//!
//! ## Warning about timeouts / cancellation
//!
//! Dropping a future returned by this crate before it completes can leave a connection with a
//! request whose reply nobody waits for. Use the `deadline` and `timeout` setters on the
//! operations instead of wrapping them in [`tokio::time::timeout`]; an operation that misses its
//! deadline fails with [`ErrorKind::TimeExceeded`](error::ErrorKind::TimeExceeded).

#![warn(missing_docs)]
#![allow(
    clippy::unreadable_literal,
    clippy::cognitive_complexity,
    clippy::float_cmp
)]
#![cfg_attr(test, type_length_limit = "80000000")]

#[macro_use]
pub mod options;

pub use ::bson;

pub mod action;
mod client;
mod cmap;
mod coll;
mod concern;
mod db;
pub mod error;
pub mod event;
mod hello;
mod operation;
pub mod results;
pub(crate) mod runtime;
mod sdam;
mod selection_criteria;
mod serde_util;
mod trace;
#[cfg(test)]
mod test;

pub use crate::{
    client::{session::ClientSession, Client},
    coll::Collection,
    db::Database,
};

pub use crate::{
    client::session::ClusterTime,
    coll::Namespace,
    sdam::{
        MemberStatus,
        ServerDescription,
        ServerType,
        TopologyDescription,
        TopologyType,
        TopologyWatcher,
    },
};

/// A boxed future, used by callbacks that borrow their arguments.
pub use futures_core::future::BoxFuture;
