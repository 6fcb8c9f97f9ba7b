use serde::Deserialize;
use tokio::time::Instant;

use crate::{
    bson::{doc, Document},
    cmap::{Command, RawCommandResponse},
    coll::Namespace,
    concern::{ReadConcern, ReadConcernInternal},
    error::{Error, Result},
    operation::{CursorBody, OperationWithDefaults, Retryability},
    sdam::SelectionCriteria,
};

/// Counts the documents matching a filter with an `aggregate` pipeline.
#[derive(Debug)]
pub(crate) struct CountDocuments {
    ns: Namespace,
    pipeline: Vec<Document>,
    selection_criteria: Option<SelectionCriteria>,
    read_concern: Option<ReadConcern>,
    deadline: Option<Instant>,
}

impl CountDocuments {
    pub(crate) fn new(
        ns: Namespace,
        filter: Document,
        skip: Option<u64>,
        limit: Option<u64>,
        selection_criteria: Option<SelectionCriteria>,
        read_concern: Option<ReadConcern>,
        deadline: Option<Instant>,
    ) -> Result<Self> {
        let mut pipeline = vec![doc! { "$match": filter }];

        if let Some(skip) = skip {
            let skip = i64::try_from(skip)
                .map_err(|_| Error::invalid_argument(format!("skip exceeds range of i64: {skip}")))?;
            pipeline.push(doc! { "$skip": skip });
        }

        if let Some(limit) = limit {
            let limit = i64::try_from(limit).map_err(|_| {
                Error::invalid_argument(format!("limit exceeds range of i64: {limit}"))
            })?;
            pipeline.push(doc! { "$limit": limit });
        }

        pipeline.push(doc! {
            "$group": {
                "_id": 1,
                "n": { "$sum": 1 },
            }
        });

        Ok(Self {
            ns,
            pipeline,
            selection_criteria,
            read_concern,
            deadline,
        })
    }
}

impl OperationWithDefaults for CountDocuments {
    type O = u64;

    const NAME: &'static str = "aggregate";

    fn build(&mut self) -> Result<Command> {
        let body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "pipeline": self.pipeline.clone(),
            "cursor": {},
        };
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
        let Some(group) = body.cursor.first_batch.into_iter().next() else {
            // Nothing matched.
            return Ok(0);
        };
        let group: Group = crate::bson::from_document(group)
            .map_err(|e| Error::invalid_response(e.to_string()))?;
        u64::try_from(group.n)
            .map_err(|_| Error::invalid_response(format!("negative count: {}", group.n)))
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

#[derive(Debug, Deserialize)]
struct Group {
    n: i64,
}
