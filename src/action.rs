//! Action builder types.

mod count;
mod delete;
mod find;
mod insert_one;
mod run_command;
mod session;
mod shutdown;
mod transaction;

use std::{
    future::Future,
    marker::PhantomData,
    ops::Deref,
    pin::Pin,
    task::{Context, Poll},
};

use futures_util::FutureExt;

pub use count::CountDocuments;
pub use delete::Delete;
pub use find::{Find, FindOne};
pub use insert_one::InsertOne;
pub use run_command::RunCommand;
pub use session::StartSession;
pub use shutdown::Shutdown;
pub use transaction::{AbortTransaction, CommitTransaction, StartTransaction};

use crate::{bson::Document, BoxFuture, Collection};

pub(crate) mod private {
    pub trait Sealed {}
}

/// A pending action to execute on the server.  The action can be configured via chained methods and
/// executed via `await`.
pub trait Action: private::Sealed + std::future::IntoFuture {
    /// If the value is `Some`, call the provided function on `self`.  Convenient for chained
    /// updates with values that need to be set conditionally.  For example:
    /// ```rust
    /// # use mongomux::{bson::Document, error::Result, Database};
    /// use mongomux::{action::Action, options::ReadPreference};
    /// async fn ping(db: &Database, read_pref: Option<ReadPreference>) -> Result<Document> {
    ///     db.run_command(mongomux::bson::doc! { "ping": 1 })
    ///         .optional(read_pref, |a, rp| a.selection_criteria(rp))
    ///         .await
    /// }
    /// ```
    fn optional<Value>(self, value: Option<Value>, f: impl FnOnce(Self, Value) -> Self) -> Self
    where
        Self: Sized,
    {
        match value {
            Some(value) => f(self, value),
            None => self,
        }
    }
}

/// The future returned by awaiting an [`Action`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ActionFuture<'a, O>(BoxFuture<'a, O>);

impl<'a, O> ActionFuture<'a, O> {
    pub(crate) fn new(future: impl Future<Output = O> + Send + 'a) -> Self {
        Self(future.boxed())
    }
}

impl<O> Future for ActionFuture<'_, O> {
    type Output = O;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.as_mut().poll(cx)
    }
}

impl<O> std::fmt::Debug for ActionFuture<'_, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionFuture").finish_non_exhaustive()
    }
}

/// A type-erased borrow of a collection, so that action types need not be generic over the
/// collection's document type.
pub(crate) struct CollRef<'a> {
    inner: Collection<Document>,
    _ref: PhantomData<&'a ()>,
}

impl<'a> CollRef<'a> {
    fn new<T: Send + Sync>(coll: &'a Collection<T>) -> Self {
        Self {
            inner: coll.clone_with_type(),
            _ref: PhantomData,
        }
    }
}

impl Deref for CollRef<'_> {
    type Target = Collection<Document>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Makes an action awaitable by running its inherent `execute` method.
///
/// `action_impl!('a, [generics] Type, Output)` with an optional trailing `where` clause.
macro_rules! action_impl {
    (
        $lt:lifetime, [$($generics:tt)*] $action:ty, $out:ty
        $(, where $($bound:tt)+)?
    ) => {
        impl<$($generics)*> crate::action::private::Sealed for $action
        $(where $($bound)+)? {}

        impl<$($generics)*> crate::action::Action for $action
        $(where $($bound)+)? {}

        impl<$($generics)*> std::future::IntoFuture for $action
        $(where $($bound)+)?
        {
            type Output = $out;
            type IntoFuture = crate::action::ActionFuture<$lt, $out>;

            fn into_future(self) -> Self::IntoFuture {
                crate::action::ActionFuture::new(self.execute())
            }
        }
    };
}
pub(crate) use action_impl;

/// Generates a chained setter for each listed field of the action's options struct, which is
/// stored in the field named first.
macro_rules! option_setters {
    (
        $field:ident: $opt_ty:ty;
        $( $(#[$meta:meta])* $name:ident: $ty:ty ),+ $(,)?
    ) => {
        fn options(&mut self) -> &mut $opt_ty {
            self.$field.get_or_insert_with(<$opt_ty>::default)
        }

        $(
            $(#[$meta])*
            pub fn $name(mut self, value: impl Into<$ty>) -> Self {
                self.options().$name = Some(value.into());
                self
            }
        )+
    };
}
pub(crate) use option_setters;

/// Generates the `deadline` and `timeout` setters for an action with a `deadline` field.
macro_rules! deadline_setters {
    () => {
        /// Fails the operation with a `TimeExceeded` error if it has not completed by `deadline`.
        /// Transient failures are retried until then.
        pub fn deadline(mut self, deadline: impl Into<tokio::time::Instant>) -> Self {
            self.deadline = Some(deadline.into());
            self
        }

        /// Like [`deadline`](Self::deadline), relative to now.
        pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
            self.deadline = Some(tokio::time::Instant::now() + timeout);
            self
        }
    };
}
pub(crate) use deadline_setters;
