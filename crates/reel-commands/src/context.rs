//! Execution context handed to running commands.

use crate::ban::BanCoordinator;
use crate::command::{Command, CommandSpec, ConflictPolicy, Submission};
use crate::error::CommandResult;
use crate::scheduler::{CommandScheduler, InlineOptions, InlineOutcome};
use crate::store::{EnqueueOutcome, RecordId};

/// Context for a command execution.
#[derive(Clone)]
pub struct CommandContext {
    scheduler: CommandScheduler,
    lane: String,
    record_id: Option<RecordId>,
}

impl CommandContext {
    pub(crate) fn new(scheduler: CommandScheduler, lane: impl Into<String>, record_id: Option<RecordId>) -> Self {
        Self {
            scheduler,
            lane: lane.into(),
            record_id,
        }
    }

    /// Lane the command runs on.
    pub fn lane(&self) -> &str {
        &self.lane
    }

    /// Queue record being executed. `None` for inline runs.
    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    /// Returns true when running inline on the caller's task.
    pub fn is_inline(&self) -> bool {
        self.record_id.is_none()
    }

    /// The scheduler that dispatched this command.
    pub fn scheduler(&self) -> &CommandScheduler {
        &self.scheduler
    }

    /// Provider ban state. Check it before making a provider call.
    pub fn bans(&self) -> &BanCoordinator {
        self.scheduler.bans()
    }

    /// Queue a follow-up command.
    pub async fn submit<C: Command>(&self, command: C) -> CommandResult<EnqueueOutcome> {
        self.scheduler.submit(command).await
    }

    /// Queue a follow-up command with overrides.
    pub async fn submit_with<C: Command>(&self, submission: Submission<C>) -> CommandResult<EnqueueOutcome> {
        self.scheduler.submit_with(submission).await
    }

    /// Run another command inline on this task.
    pub async fn run_inline<C: Command>(&self, command: C, options: InlineOptions) -> CommandResult<InlineOutcome> {
        self.scheduler.run_inline(command, options).await
    }

    /// Queue another attempt of `command`, typically before returning
    /// [`Execution::Backoff`](crate::command::Execution::Backoff).
    ///
    /// The record currently executing still holds the dedup key, so the new
    /// attempt always replaces it regardless of the type's conflict policy.
    pub async fn resubmit<C: Command>(&self, command: &C) -> CommandResult<EnqueueOutcome> {
        let mut spec = CommandSpec::new(command)?;
        spec.lane = self.lane.clone();
        spec.conflict = ConflictPolicy::ReplaceExisting;
        self.scheduler.enqueue_spec(spec).await
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("lane", &self.lane)
            .field("record_id", &self.record_id)
            .finish_non_exhaustive()
    }
}
