use tokio::time::Instant;

use crate::{
    bson::doc,
    cmap::{Command, RawCommandResponse},
    concern::WriteConcern,
    error::Result,
    operation::{OperationWithDefaults, Retryability},
    sdam::SelectionCriteria,
};

pub(crate) struct AbortTransaction {
    write_concern: Option<WriteConcern>,
    pinned: Option<SelectionCriteria>,
    deadline: Option<Instant>,
}

impl AbortTransaction {
    pub(crate) fn new(
        write_concern: Option<WriteConcern>,
        pinned: Option<SelectionCriteria>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            write_concern,
            pinned,
            deadline,
        }
    }
}

impl OperationWithDefaults for AbortTransaction {
    type O = ();

    const NAME: &'static str = "abortTransaction";

    fn build(&mut self) -> Result<Command> {
        let mut command = Command::new(Self::NAME, "admin", doc! { Self::NAME: 1 });
        command.set_write_concern(&self.write_concern.clone().unwrap_or_default())?;
        Ok(command)
    }

    fn handle_response(&self, _response: RawCommandResponse) -> Result<Self::O> {
        Ok(())
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.pinned.as_ref()
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }

    fn retryability(&self) -> Retryability {
        Retryability::Write
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
