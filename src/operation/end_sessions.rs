use crate::{
    bson::{doc, Document},
    cmap::{Command, RawCommandResponse},
    error::Result,
    operation::{OperationWithDefaults, Retryability},
    sdam::SelectionCriteria,
    selection_criteria::ReadPreference,
};

/// Tells the deployment that a batch of server sessions will not be used again.
pub(crate) struct EndSessions {
    session_ids: Vec<Document>,
    selection_criteria: SelectionCriteria,
}

impl EndSessions {
    pub(crate) fn new(session_ids: Vec<Document>) -> Self {
        Self {
            session_ids,
            selection_criteria: ReadPreference::PrimaryPreferred.into(),
        }
    }
}

impl OperationWithDefaults for EndSessions {
    type O = ();

    const NAME: &'static str = "endSessions";

    fn build(&mut self) -> Result<Command> {
        Ok(Command::new_read(
            Self::NAME,
            "admin",
            self.selection_criteria.as_read_pref(),
            doc! { Self::NAME: self.session_ids.clone() },
        ))
    }

    fn handle_response(&self, _response: RawCommandResponse) -> Result<Self::O> {
        Ok(())
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        Some(&self.selection_criteria)
    }

    fn supports_sessions(&self) -> bool {
        false
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
