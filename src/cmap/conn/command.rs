use serde::de::DeserializeOwned;

use super::wire::Message;
use crate::{
    bson::{Bson, Document, Timestamp},
    client::session::ClusterTime,
    concern::{ReadConcernInternal, WriteConcern},
    error::{CommandError, Error, ErrorKind, Result, WriteConcernError},
    options::ServerAddress,
    selection_criteria::ReadPreference,
    serde_util,
};

/// `Command` is a client side abstraction of a server command containing all the information
/// necessary to serialize it to a wire message.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Command {
    pub(crate) name: String,
    pub(crate) target_db: String,
    pub(crate) read_pref: Option<ReadPreference>,
    pub(crate) body: Document,
    /// Sent with the `moreToCome` flag; the server will not reply.
    pub(crate) more_to_come: bool,
    /// The session's operation counter for this attempt. Not sent on the wire.
    pub(crate) session_operation: Option<u64>,
}

impl Command {
    /// Constructs a new command.
    pub(crate) fn new(name: impl Into<String>, target_db: impl Into<String>, body: Document) -> Self {
        Self {
            name: name.into(),
            target_db: target_db.into(),
            read_pref: None,
            body,
            more_to_come: false,
            session_operation: None,
        }
    }

    /// Constructs a read command.
    pub(crate) fn new_read(
        name: impl Into<String>,
        target_db: impl Into<String>,
        read_pref: Option<ReadPreference>,
        body: Document,
    ) -> Self {
        Self {
            read_pref,
            ..Self::new(name, target_db, body)
        }
    }

    pub(crate) fn set_session(&mut self, session_id: &Document) {
        self.body.insert("lsid", session_id.clone());
    }

    pub(crate) fn set_cluster_time(&mut self, cluster_time: &ClusterTime) {
        // this should never fail.
        if let Ok(doc) = crate::bson::to_bson(cluster_time) {
            self.body.insert("$clusterTime", doc);
        }
    }

    pub(crate) fn set_txn_number(&mut self, txn_number: i64) {
        self.body.insert("txnNumber", txn_number);
    }

    pub(crate) fn set_start_transaction(&mut self) {
        self.body.insert("startTransaction", true);
    }

    pub(crate) fn set_autocommit(&mut self) {
        self.body.insert("autocommit", false);
    }

    pub(crate) fn set_read_concern(&mut self, read_concern: &ReadConcernInternal) -> Result<()> {
        if !read_concern.is_empty() {
            self.body
                .insert("readConcern", crate::bson::to_document(read_concern)?);
        }
        Ok(())
    }

    pub(crate) fn set_write_concern(&mut self, write_concern: &WriteConcern) -> Result<()> {
        self.body.insert("writeConcern", write_concern.to_document()?);
        Ok(())
    }

    pub(crate) fn remove_write_concern(&mut self) {
        self.body.remove("writeConcern");
    }

    /// The write concern already present in the command body, if any.
    pub(crate) fn write_concern(&self) -> Option<WriteConcern> {
        self.body
            .get_document("writeConcern")
            .ok()
            .and_then(|doc| crate::bson::from_document(doc.clone()).ok())
    }

    /// The body as sent on the wire: the command fields followed by `$db` and, for reads routed
    /// away from the primary, `$readPreference`.
    pub(crate) fn to_document(&self) -> Document {
        let mut document = self.body.clone();
        document.insert("$db", self.target_db.clone());
        if let Some(read_pref) = self.read_pref.filter(|rp| *rp != ReadPreference::Primary) {
            document.insert("$readPreference", read_pref.to_document());
        }
        document
    }
}

/// A reply to a [`Command`], along with the address of the server that sent it.
#[derive(Debug, Clone)]
pub(crate) struct RawCommandResponse {
    pub(crate) source: ServerAddress,
    pub(crate) body: Document,
}

impl RawCommandResponse {
    pub(crate) fn new(source: ServerAddress, message: Message) -> Self {
        Self {
            source,
            body: message.into_document(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_document(source: ServerAddress, body: Document) -> Self {
        Self { source, body }
    }

    /// Returns whether this response indicates a success or not (i.e. if "ok: 1")
    pub(crate) fn is_success(&self) -> bool {
        self.body
            .get("ok")
            .and_then(serde_util::get_int)
            .map(|ok| ok == 1)
            .unwrap_or(false)
    }

    /// Returns a result indicating whether this response corresponds to a command failure. A
    /// reply with `ok: 1` that carries a `writeConcernError` is also a failure.
    pub(crate) fn validate(&self) -> Result<()> {
        let labels = self
            .body
            .get_array("errorLabels")
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|label| label.as_str().map(String::from))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if !self.is_success() {
            let command_error: CommandError =
                crate::bson::from_bson(Bson::Document(self.body.clone())).map_err(|_| {
                    Error::invalid_response(format!(
                        "server returned a failure without an error code: {}",
                        self.body
                    ))
                })?;
            return Err(Error::new(ErrorKind::Command(command_error), Some(labels)));
        }

        if let Ok(wc_error) = self.body.get_document("writeConcernError") {
            let wc_error: WriteConcernError = crate::bson::from_document(wc_error.clone())
                .map_err(|e| Error::invalid_response(e.to_string()))?;
            return Err(Error::new(ErrorKind::WriteConcern(wc_error), Some(labels)));
        }

        Ok(())
    }

    /// Deserialize the body of the response.
    pub(crate) fn body<T: DeserializeOwned>(&self) -> Result<T> {
        crate::bson::from_document(self.body.clone())
            .map_err(|e| Error::invalid_response(e.to_string()))
    }

    /// Gets the cluster time from the response, if any.
    pub(crate) fn cluster_time(&self) -> Option<ClusterTime> {
        self.body
            .get_document("$clusterTime")
            .ok()
            .and_then(|doc| crate::bson::from_document(doc.clone()).ok())
    }

    pub(crate) fn operation_time(&self) -> Option<Timestamp> {
        self.body.get_timestamp("operationTime").ok()
    }

    /// The address of the server that sent this response.
    pub(crate) fn source_address(&self) -> &ServerAddress {
        &self.source
    }
}
