//! Contains all of the types needed to specify options to client operations.
//!
//! Most of the options structs in this module use the
//! [`typed-builder`](https://crates.io/crates/typed-builder) crate to derive a type-safe builder
//! API on them:
//!
//! ```rust
//! # use std::time::Duration;
//! # use mongomux::options::{TransactionOptions, WriteConcern};
//! let options = TransactionOptions::builder()
//!     .write_concern(WriteConcern::majority())
//!     .max_commit_time(Duration::from_secs(5))
//!     .build();
//! ```

pub use crate::{
    client::options::*,
    coll::options::*,
    concern::*,
    db::options::*,
    selection_criteria::*,
};

/// Fills the unset fields of an options struct with the defaults of a client or session.
macro_rules! resolve_options {
    ($obj:expr, $opts:expr, [$( $field:ident ),+] ) => {
        $(
            if let Some(option) = $obj.$field() {
                if !$opts
                    .as_ref()
                    .map(|opts| opts.$field.is_some())
                    .unwrap_or(false)
                {
                    $opts.get_or_insert_with(Default::default).$field = Some(option.clone());
                }
            }
        )+
    };
}

/// Merges the options from src into dst, keeping the values already set in dst.
macro_rules! merge_options {
    ($src:expr, $dst:expr, [$( $field:ident ),+] ) => {
        $(
            if let Some(ref option) = $src.$field {
                if $dst.$field.is_none() {
                    $dst.$field = Some(option.clone());
                }
            }
        )+
    };
}

/// Resolves the read concern of an options struct. Inside a transaction the statement's read
/// concern is dropped; otherwise it is inherited from the collection.
macro_rules! resolve_read_concern_with_session {
    ($obj:expr, $opts:expr, $session:expr) => {{
        resolve_rw_concern_with_session!($obj, $opts, $session, read_concern)
    }};
}

/// Resolves the write concern of an options struct. Inside a transaction the statement's write
/// concern is dropped; otherwise it is inherited from the collection.
macro_rules! resolve_write_concern_with_session {
    ($obj:expr, $opts:expr, $session:expr) => {{
        resolve_rw_concern_with_session!($obj, $opts, $session, write_concern)
    }};
}

macro_rules! resolve_rw_concern_with_session {
    ($obj:expr, $opts:expr, $session:expr, $concern:ident) => {{
        match $session {
            Some(session) if session.in_transaction() => {
                if let Some(opts) = $opts.as_mut() {
                    opts.$concern = None;
                }
            }
            _ => {
                resolve_options!($obj, $opts, [$concern]);
            }
        }
    }};
}
