use tokio::time::Instant;

use crate::{
    bson::Document,
    db::options::RunCommandOptions,
    error::Result,
    operation::RunCommand as Op,
    options::{ReadPreference, WriteConcern},
    ClientSession,
    Database,
};

use super::{action_impl, deadline_setters, option_setters};

impl Database {
    /// Runs a database-level command.
    ///
    /// Note that no inspection is done on `command`, so the command will not use the database's
    /// default read concern, write concern or read preference. The command is sent to the primary
    /// unless a read preference is set on the action.
    ///
    /// `await` will return [`Result<Document>`](crate::error::Result).
    pub fn run_command(&self, command: Document) -> RunCommand<'_> {
        RunCommand {
            db: self,
            command,
            options: None,
            session: None,
            deadline: None,
        }
    }
}

/// Run a database-level command.  Construct with [`Database::run_command`].
#[must_use]
pub struct RunCommand<'a> {
    db: &'a Database,
    command: Document,
    options: Option<RunCommandOptions>,
    session: Option<&'a mut ClientSession>,
    deadline: Option<Instant>,
}

impl<'a> RunCommand<'a> {
    option_setters! { options: RunCommandOptions;
        /// The read preference for the command.
        selection_criteria: ReadPreference,
        /// Added to the command as `writeConcern` outside of transactions.
        write_concern: WriteConcern,
    }

    deadline_setters!();

    /// Run the command using the provided [`ClientSession`].
    pub fn session(mut self, value: impl Into<&'a mut ClientSession>) -> Self {
        self.session = Some(value.into());
        self
    }

    async fn execute(self) -> Result<Document> {
        let options = self.options.unwrap_or_default();
        let write_concern = options
            .write_concern
            .filter(|_| !self.session.as_deref().is_some_and(ClientSession::in_transaction));
        let mut run_command = Op::new(
            self.db.name().into(),
            self.command,
            options.selection_criteria.map(Into::into),
            write_concern,
            self.deadline,
        )?;
        self.db
            .client()
            .execute_operation(&mut run_command, self.session)
            .await
    }
}

action_impl!('a, ['a] RunCommand<'a>, Result<Document>);
