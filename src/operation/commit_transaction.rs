use std::time::Duration;

use tokio::time::Instant;

use crate::{
    bson::doc,
    cmap::{Command, RawCommandResponse},
    concern::{Acknowledgment, WriteConcern},
    error::Result,
    operation::{OperationWithDefaults, Retryability},
    sdam::SelectionCriteria,
    serde_util,
};

/// `wtimeout` used when a commit is retried.
const RETRY_W_TIMEOUT: Duration = Duration::from_millis(10_000);

pub(crate) struct CommitTransaction {
    write_concern: Option<WriteConcern>,
    max_commit_time: Option<Duration>,
    pinned: Option<SelectionCriteria>,
    deadline: Option<Instant>,
}

impl CommitTransaction {
    pub(crate) fn new(
        write_concern: Option<WriteConcern>,
        max_commit_time: Option<Duration>,
        pinned: Option<SelectionCriteria>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            write_concern,
            max_commit_time,
            pinned,
            deadline,
        }
    }
}

impl OperationWithDefaults for CommitTransaction {
    type O = ();

    const NAME: &'static str = "commitTransaction";

    fn build(&mut self) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: 1,
        };
        if let Some(max_commit_time) = self.max_commit_time {
            body.insert(
                "maxTimeMS",
                serde_util::duration_as_millis_i64(max_commit_time),
            );
        }

        let mut command = Command::new(Self::NAME, "admin", body);
        // Sent even when empty.
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

    /// A retried commit waits for a majority, whatever the caller asked for.
    fn update_for_retry(&mut self) {
        self.write_concern = Some(WriteConcern {
            w: Some(Acknowledgment::Majority),
            w_timeout: Some(RETRY_W_TIMEOUT),
            journal: None,
        });
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
