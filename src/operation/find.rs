use tokio::time::Instant;

use crate::{
    bson::{doc, Document},
    cmap::{Command, RawCommandResponse},
    coll::Namespace,
    concern::{ReadConcern, ReadConcernInternal},
    error::Result,
    operation::{CursorBody, OperationWithDefaults, Retryability},
    sdam::SelectionCriteria,
};

/// Runs a `find` and returns its first batch.
#[derive(Debug)]
pub(crate) struct Find {
    ns: Namespace,
    filter: Document,
    limit: Option<i64>,
    selection_criteria: Option<SelectionCriteria>,
    read_concern: Option<ReadConcern>,
    deadline: Option<Instant>,
}

impl Find {
    pub(crate) fn new(
        ns: Namespace,
        filter: Document,
        limit: Option<i64>,
        selection_criteria: Option<SelectionCriteria>,
        read_concern: Option<ReadConcern>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            ns,
            filter,
            limit,
            selection_criteria,
            read_concern,
            deadline,
        }
    }
}

impl OperationWithDefaults for Find {
    type O = Vec<Document>;

    const NAME: &'static str = "find";

    fn build(&mut self) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "filter": self.filter.clone(),
        };
        if let Some(limit) = self.limit.filter(|limit| *limit != 0) {
            body.insert("limit", limit.abs());
            body.insert("singleBatch", true);
        }

        let mut command = Command::new_read(
            Self::NAME,
            self.ns.db.clone(),
            self.selection_criteria
                .as_ref()
                .and_then(SelectionCriteria::as_read_pref),
            body,
        );
        if let Some(ref read_concern) = self.read_concern {
            command.set_read_concern(&ReadConcernInternal::from(read_concern.clone()))?;
        }
        Ok(command)
    }

    fn handle_response(&self, response: RawCommandResponse) -> Result<Self::O> {
        let body: CursorBody = response.body()?;
        Ok(body.cursor.first_batch)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn supports_read_concern(&self) -> bool {
        true
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
