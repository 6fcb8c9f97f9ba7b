use serde::Deserialize;
use typed_builder::TypedBuilder;

use crate::{
    concern::{ReadConcern, WriteConcern},
    selection_criteria::ReadPreference,
};

/// These are the valid options for creating a [`Database`](../struct.Database.html) with
/// [`Client::database_with_options`](../struct.Client.html#method.database_with_options).
/// Unset fields inherit the client's defaults.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DatabaseOptions {
    /// The default read preference for operations.
    pub selection_criteria: Option<ReadPreference>,

    /// The default read concern for operations.
    pub read_concern: Option<ReadConcern>,

    /// The default write concern for operations.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a [`Database::run_command`](../struct.Database.html#method.run_command)
/// operation.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct RunCommandOptions {
    /// The read preference for the command. Defaults to primary.
    pub selection_criteria: Option<ReadPreference>,

    /// Added to the command as `writeConcern`. Not sent inside a transaction.
    pub write_concern: Option<WriteConcern>,
}
