use serde::Deserialize;
use typed_builder::TypedBuilder;

use crate::{
    concern::{ReadConcern, WriteConcern},
    selection_criteria::ReadPreference,
};

/// These are the valid options for creating a [`Collection`](../struct.Collection.html) with
/// [`Database::collection_with_options`](../struct.Database.html#method.collection_with_options).
/// Unset fields inherit the database's defaults.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CollectionOptions {
    /// The default read preference for operations.
    pub selection_criteria: Option<ReadPreference>,

    /// The default read concern for operations.
    pub read_concern: Option<ReadConcern>,

    /// The default write concern for operations.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a
/// [`Collection::insert_one`](../struct.Collection.html#method.insert_one) operation.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct InsertOneOptions {
    /// The write concern for the operation. Ignored inside a transaction.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a [`Collection::find`](../struct.Collection.html#method.find)
/// operation.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct FindOptions {
    /// The maximum number of documents to return.
    pub limit: Option<i64>,

    /// The read preference for the operation.
    pub selection_criteria: Option<ReadPreference>,

    /// The read concern for the operation. Ignored inside a transaction.
    pub read_concern: Option<ReadConcern>,
}

/// Specifies the options to a
/// [`Collection::count_documents`](../struct.Collection.html#method.count_documents) operation.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct CountOptions {
    /// The number of matching documents to skip before counting.
    pub skip: Option<u64>,

    /// The maximum number of documents to count.
    pub limit: Option<u64>,

    /// The read preference for the operation.
    pub selection_criteria: Option<ReadPreference>,

    /// The read concern for the operation. Ignored inside a transaction.
    pub read_concern: Option<ReadConcern>,
}

/// Specifies the options to a
/// [`Collection::delete_many`](../struct.Collection.html#method.delete_many) operation.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct DeleteOptions {
    /// The write concern for the operation. Ignored inside a transaction.
    pub write_concern: Option<WriteConcern>,
}
