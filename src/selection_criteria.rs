use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    bson::{doc, Document},
    error::{Error, Result},
};

/// Specifies how the client should route a read operation among the members of a replica set.
///
/// Writes always go to the primary regardless of the read preference.
///
/// See the documentation [here](https://www.mongodb.com/docs/manual/core/read-preference/) for more details.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, derive_more::Display)]
#[non_exhaustive]
pub enum ReadPreference {
    /// Only route this operation to the primary.
    #[default]
    #[display("primary")]
    Primary,

    /// Only route this operation to a secondary.
    #[display("secondary")]
    Secondary,

    /// Route this operation to the primary if it's available, but fall back to the secondaries
    /// if not.
    #[display("primaryPreferred")]
    PrimaryPreferred,

    /// Route this operation to a secondary if one is available, but fall back to the primary if
    /// not.
    #[display("secondaryPreferred")]
    SecondaryPreferred,

    /// Route this operation to the member with the lowest round-trip time.
    #[display("nearest")]
    Nearest,
}

impl ReadPreference {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ReadPreference::Primary => "primary",
            ReadPreference::Secondary => "secondary",
            ReadPreference::PrimaryPreferred => "primaryPreferred",
            ReadPreference::SecondaryPreferred => "secondaryPreferred",
            ReadPreference::Nearest => "nearest",
        }
    }

    /// The `$readPreference` document attached to commands routed by this preference.
    pub(crate) fn to_document(self) -> Document {
        doc! { "mode": self.as_str() }
    }
}

impl FromStr for ReadPreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(ReadPreference::Primary),
            "secondary" => Ok(ReadPreference::Secondary),
            "primarypreferred" => Ok(ReadPreference::PrimaryPreferred),
            "secondarypreferred" => Ok(ReadPreference::SecondaryPreferred),
            "nearest" => Ok(ReadPreference::Nearest),
            other => Err(Error::invalid_argument(format!(
                "'{other}' is not a valid read preference"
            ))),
        }
    }
}

impl Serialize for ReadPreference {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_document().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ReadPreference {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ReadPreferenceHelper {
            mode: String,
        }
        let helper = ReadPreferenceHelper::deserialize(deserializer)?;
        helper.mode.parse().map_err(serde::de::Error::custom)
    }
}
