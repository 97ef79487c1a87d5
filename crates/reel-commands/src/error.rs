//! Command error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for command operations.
pub type CommandResult<T> = Result<T, CommandError>;

/// Command-related errors.
///
/// A provider ban reported through the queue is not an error: commands
/// return [`Execution::Backoff`](crate::command::Execution::Backoff) for that.
/// [`CommandError::Banned`] only surfaces from inline execution when the
/// caller asked for failures to be propagated.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Command execution failed.
    #[error("Command execution failed: {0}")]
    Failed(String),

    /// A provider resource the command needs is banned.
    #[error("Resource {resource} is banned until {resume_at}")]
    Banned {
        resource: String,
        resume_at: DateTime<Utc>,
    },

    /// A persisted record could not be turned back into a command.
    #[error("Corrupt command record {id}: {reason}")]
    CorruptRecord { id: i64, reason: String },

    /// No command type with this name is registered.
    #[error("Unknown command type: {0}")]
    UnknownCommand(String),

    /// No lane with this name is configured.
    #[error("Unknown lane: {0}")]
    UnknownLane(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Scheduler is not running or already started.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Error raised by command code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CommandError {
    /// Creates an execution failure from any displayable error.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        CommandError::Failed(err.to_string())
    }

    /// Returns true if this error is a provider ban.
    pub fn is_ban(&self) -> bool {
        matches!(self, CommandError::Banned { .. })
    }

    /// Returns true if the error came from the queue store.
    pub fn is_store_error(&self) -> bool {
        matches!(self, CommandError::Database(_))
    }
}

impl From<reel_core::ReelError> for CommandError {
    fn from(err: reel_core::ReelError) -> Self {
        match err {
            reel_core::ReelError::Configuration(msg) => CommandError::Configuration(msg),
            other => CommandError::Internal(other.to_string()),
        }
    }
}
