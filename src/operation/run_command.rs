use tokio::time::Instant;

use crate::{
    bson::Document,
    cmap::{Command, RawCommandResponse},
    concern::WriteConcern,
    error::{Error, Result},
    operation::{append_write_concern, OperationWithDefaults},
    sdam::SelectionCriteria,
    serde_util,
};

/// Commands that cannot be sent with an `lsid`.
const SESSIONS_UNSUPPORTED_COMMANDS: &[&str] = &["ismaster", "hello", "endsessions"];

/// Runs an arbitrary command document against a database.
#[derive(Debug, Clone)]
pub(crate) struct RunCommand {
    db: String,
    command: Document,
    selection_criteria: Option<SelectionCriteria>,
    write_concern: Option<WriteConcern>,
    deadline: Option<Instant>,
}

impl RunCommand {
    pub(crate) fn new(
        db: String,
        command: Document,
        selection_criteria: Option<SelectionCriteria>,
        write_concern: Option<WriteConcern>,
        deadline: Option<Instant>,
    ) -> Result<Self> {
        if command.is_empty() {
            return Err(Error::invalid_argument(
                "an empty document cannot be passed to a run_command operation",
            ));
        }
        Ok(Self {
            db,
            command,
            selection_criteria,
            write_concern,
            deadline,
        })
    }

    fn command_name(&self) -> &str {
        serde_util::first_key(&self.command).unwrap_or_default()
    }
}

impl OperationWithDefaults for RunCommand {
    type O = Document;

    // Since we can't actually specify a string statically here, we just put a descriptive string
    // that should fail loudly if accidentally passed to the server.
    const NAME: &'static str = "$genericRunCommand";

    fn build(&mut self) -> Result<Command> {
        let mut command = Command::new_read(
            self.command_name(),
            self.db.clone(),
            self.selection_criteria
                .as_ref()
                .and_then(SelectionCriteria::as_read_pref),
            self.command.clone(),
        );
        append_write_concern(&mut command, self.write_concern.as_ref())?;
        Ok(command)
    }

    fn handle_response(&self, response: RawCommandResponse) -> Result<Self::O> {
        Ok(response.body)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }

    fn supports_sessions(&self) -> bool {
        !SESSIONS_UNSUPPORTED_COMMANDS.contains(&self.command_name().to_lowercase().as_str())
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn name(&self) -> &str {
        self.command_name()
    }
}
