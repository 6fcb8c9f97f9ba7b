use tokio::time::Instant;

use crate::{
    bson::{doc, Document},
    cmap::{Command, RawCommandResponse},
    coll::Namespace,
    concern::WriteConcern,
    error::Result,
    operation::{append_write_concern, OperationWithDefaults, WriteResponseBody},
    results::DeleteResult,
};

#[derive(Debug)]
pub(crate) struct Delete {
    ns: Namespace,
    filter: Document,
    /// Zero deletes every match.
    limit: u32,
    write_concern: Option<WriteConcern>,
    deadline: Option<Instant>,
}

impl Delete {
    pub(crate) fn new(
        ns: Namespace,
        filter: Document,
        limit: Option<u32>,
        write_concern: Option<WriteConcern>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            ns,
            filter,
            limit: limit.unwrap_or(0),
            write_concern,
            deadline,
        }
    }
}

impl OperationWithDefaults for Delete {
    type O = DeleteResult;

    const NAME: &'static str = "delete";

    fn build(&mut self) -> Result<Command> {
        let delete = doc! {
            "q": self.filter.clone(),
            "limit": self.limit as i32,
        };
        let body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "deletes": [delete],
            "ordered": true,
        };
        let mut command = Command::new(Self::NAME, self.ns.db.clone(), body);
        append_write_concern(&mut command, self.write_concern.as_ref())?;
        Ok(command)
    }

    fn handle_response(&self, response: RawCommandResponse) -> Result<Self::O> {
        let deleted_count = if self.is_acknowledged() {
            response.body::<WriteResponseBody>()?.n
        } else {
            0
        };
        Ok(DeleteResult { deleted_count })
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
