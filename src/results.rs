//! Contains the types of results returned by CRUD operations.

use serde::Serialize;

use crate::bson::Bson;

/// The result of a [`Collection::insert_one`](../struct.Collection.html#method.insert_one)
/// operation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct InsertOneResult {
    /// The `_id` field of the document inserted.
    pub inserted_id: Bson,
}

/// The result of a [`Collection::delete_many`](../struct.Collection.html#method.delete_many)
/// operation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DeleteResult {
    /// The number of documents deleted by the operation. Zero for unacknowledged writes.
    pub deleted_count: u64,
}
