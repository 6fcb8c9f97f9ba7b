use tokio::time::Instant;

use crate::{
    bson::{doc, oid::ObjectId, Bson, Document},
    cmap::{Command, RawCommandResponse},
    coll::Namespace,
    concern::WriteConcern,
    error::Result,
    operation::{append_write_concern, OperationWithDefaults, WriteResponseBody},
    results::InsertOneResult,
};

/// Inserts one document, generating its `_id` if it has none.
#[derive(Debug)]
pub(crate) struct Insert {
    ns: Namespace,
    document: Document,
    inserted_id: Bson,
    write_concern: Option<WriteConcern>,
    deadline: Option<Instant>,
}

impl Insert {
    pub(crate) fn new(
        ns: Namespace,
        mut document: Document,
        write_concern: Option<WriteConcern>,
        deadline: Option<Instant>,
    ) -> Self {
        let inserted_id = match document.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                let mut with_id = doc! { "_id": id.clone() };
                with_id.extend(document);
                document = with_id;
                id
            }
        };
        Self {
            ns,
            document,
            inserted_id,
            write_concern,
            deadline,
        }
    }
}

impl OperationWithDefaults for Insert {
    type O = InsertOneResult;

    const NAME: &'static str = "insert";

    fn build(&mut self) -> Result<Command> {
        let body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "documents": [self.document.clone()],
            "ordered": true,
        };
        let mut command = Command::new(Self::NAME, self.ns.db.clone(), body);
        append_write_concern(&mut command, self.write_concern.as_ref())?;
        Ok(command)
    }

    fn handle_response(&self, response: RawCommandResponse) -> Result<Self::O> {
        if self.is_acknowledged() {
            let _: WriteResponseBody = response.body()?;
        }
        Ok(InsertOneResult {
            inserted_id: self.inserted_id.clone(),
        })
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
