//! Command trait and definitions.

use crate::ban::BanSignal;
use crate::config::GENERAL_LANE;
use crate::context::CommandContext;
use crate::error::CommandError;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Command priority. Lower values run sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(i32);

impl Priority {
    /// User-facing work that something is waiting on.
    pub const CRITICAL: Priority = Priority(1);
    /// Work that unblocks other commands.
    pub const HIGH: Priority = Priority(3);
    /// Default priority.
    pub const NORMAL: Priority = Priority(5);
    /// Bulk refreshes.
    pub const LOW: Priority = Priority(7);
    /// Statistics and housekeeping.
    pub const BACKGROUND: Priority = Priority(9);

    /// Creates a priority from its ordinal.
    pub const fn new(value: i32) -> Self {
        Priority(value)
    }

    /// Returns the ordinal.
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to do when a submission's dedup key is already queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Keep the queued record; the new submission is a no-op.
    #[default]
    KeepExisting,
    /// Delete the queued record and queue the new one.
    ReplaceExisting,
}

/// How a command's execution ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// The command did its work.
    Completed,
    /// A provider refused service. The command has resubmitted itself if it
    /// wants another attempt; the lane pauses until the ban lifts.
    Backoff(BanSignal),
}

/// Human-readable progress description for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescription {
    /// Message shown to operators.
    pub message: String,
    /// Structured values referenced by the message.
    pub params: Vec<(String, String)>,
}

impl CommandDescription {
    /// Creates a description with no structured params.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            params: Vec::new(),
        }
    }

    /// Adds a structured param.
    pub fn param(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }
}

/// Trait for defining commands.
///
/// A command is the unit of work the processor schedules: it is serialized
/// into the queue store, reconstructed by the registry and executed on its
/// lane.
///
/// # Example
///
/// ```rust,ignore
/// use reel_commands::{Command, CommandContext, CommandError, Execution};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct HashFile {
///     path: String,
/// }
///
/// #[async_trait::async_trait]
/// impl Command for HashFile {
///     const NAME: &'static str = "hash_file";
///     const LANE: &'static str = "hasher";
///
///     fn dedup_key(&self) -> String {
///         self.path.clone()
///     }
///
///     async fn execute(&self, _ctx: &CommandContext) -> Result<Execution, CommandError> {
///         Ok(Execution::Completed)
///     }
/// }
/// ```
#[async_trait]
pub trait Command: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique name for this command type.
    const NAME: &'static str;

    /// Lane this command type runs on.
    const LANE: &'static str = GENERAL_LANE;

    /// Default priority.
    const PRIORITY: Priority = Priority::NORMAL;

    /// Conflict policy for duplicate submissions.
    const CONFLICT: ConflictPolicy = ConflictPolicy::KeepExisting;

    /// Key identifying "the same logical command". Must depend only on
    /// parameters so reloaded records dedupe against new submissions.
    fn dedup_key(&self) -> String;

    /// Execute the command.
    async fn execute(&self, ctx: &CommandContext) -> Result<Execution, CommandError>;

    /// Describes the command for monitoring.
    fn describe(&self) -> CommandDescription {
        CommandDescription::new(Self::NAME)
    }
}

/// Builds the stored dedup key, namespaced by command type.
pub(crate) fn qualified_key(command_type: &str, key: &str) -> String {
    format!("{}:{}", command_type, key)
}

/// Serialized command ready for the queue store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command type name.
    pub command_type: String,
    /// Namespaced dedup key.
    pub dedup_key: String,
    /// Lane the command runs on.
    pub lane: String,
    /// Priority.
    pub priority: Priority,
    /// Conflict policy applied on enqueue.
    pub conflict: ConflictPolicy,
    /// Serialized parameters.
    pub parameters: Vec<u8>,
}

impl CommandSpec {
    /// Serializes a command with its type defaults.
    pub fn new<C: Command>(command: &C) -> Result<Self, CommandError> {
        Ok(Self {
            command_type: C::NAME.to_string(),
            dedup_key: qualified_key(C::NAME, &command.dedup_key()),
            lane: C::LANE.to_string(),
            priority: C::PRIORITY,
            conflict: C::CONFLICT,
            parameters: serde_json::to_vec(command)?,
        })
    }
}

/// Builder for submitting a command with overrides.
pub struct Submission<C: Command> {
    command: C,
    priority: Option<Priority>,
    lane: Option<String>,
}

impl<C: Command> Submission<C> {
    /// Creates a submission using the command type's defaults.
    pub fn new(command: C) -> Self {
        Self {
            command,
            priority: None,
            lane: None,
        }
    }

    /// Override the priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Override the lane.
    pub fn lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }

    /// Build the command spec.
    pub fn build(self) -> Result<CommandSpec, CommandError> {
        let mut spec = CommandSpec::new(&self.command)?;
        if let Some(priority) = self.priority {
            spec.priority = priority;
        }
        if let Some(lane) = self.lane {
            spec.lane = lane;
        }
        Ok(spec)
    }
}
