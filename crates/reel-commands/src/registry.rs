//! Command type registry.
//!
//! Persisted records only carry a type name and serialized parameters. The
//! registry maps the name back to the concrete [`Command`] type so the
//! processor can rebuild and run it.

use crate::command::{Command, CommandDescription, ConflictPolicy, Execution, Priority};
use crate::context::CommandContext;
use crate::error::{CommandError, CommandResult};
use crate::store::QueuedCommandRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

/// Object-safe view of a reconstructed command.
#[async_trait]
pub trait DynCommand: Send + Sync {
    /// Registered type name.
    fn command_type(&self) -> &'static str;

    /// Unqualified dedup key.
    fn dedup_key(&self) -> String;

    /// Describes the command for monitoring.
    fn describe(&self) -> CommandDescription;

    /// Execute the command.
    async fn execute(&self, ctx: &CommandContext) -> Result<Execution, CommandError>;
}

#[async_trait]
impl<C: Command> DynCommand for C {
    fn command_type(&self) -> &'static str {
        C::NAME
    }

    fn dedup_key(&self) -> String {
        Command::dedup_key(self)
    }

    fn describe(&self) -> CommandDescription {
        Command::describe(self)
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<Execution, CommandError> {
        Command::execute(self, ctx).await
    }
}

type DecodeFn = fn(&[u8]) -> Result<Box<dyn DynCommand>, serde_json::Error>;

fn decode<C: Command>(parameters: &[u8]) -> Result<Box<dyn DynCommand>, serde_json::Error> {
    let command: C = serde_json::from_slice(parameters)?;
    Ok(Box::new(command))
}

/// Registration of a single command type.
#[derive(Clone, Copy)]
pub struct CommandEntry {
    /// Type name.
    pub name: &'static str,
    /// Default lane.
    pub lane: &'static str,
    /// Default priority.
    pub priority: Priority,
    /// Conflict policy.
    pub conflict: ConflictPolicy,
    decode: DecodeFn,
}

impl fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEntry")
            .field("name", &self.name)
            .field("lane", &self.lane)
            .field("priority", &self.priority)
            .field("conflict", &self.conflict)
            .finish_non_exhaustive()
    }
}

/// Registry of command types the processor knows how to run.
#[derive(Debug, Default, Clone)]
pub struct CommandRegistry {
    entries: HashMap<&'static str, CommandEntry>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command type.
    ///
    /// Registering the same name twice keeps the last registration.
    pub fn register<C: Command>(&mut self) -> &mut Self {
        let entry = CommandEntry {
            name: C::NAME,
            lane: C::LANE,
            priority: C::PRIORITY,
            conflict: C::CONFLICT,
            decode: decode::<C>,
        };
        if self.entries.insert(C::NAME, entry).is_some() {
            warn!(command_type = C::NAME, "Command type registered twice");
        } else {
            info!(command_type = C::NAME, lane = C::LANE, "Registered command type");
        }
        self
    }

    /// Returns true if the type name is registered.
    pub fn contains(&self, command_type: &str) -> bool {
        self.entries.contains_key(command_type)
    }

    /// Looks up a registration.
    pub fn entry(&self, command_type: &str) -> Option<&CommandEntry> {
        self.entries.get(command_type)
    }

    /// Registered type names, sorted.
    pub fn command_types(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuild the command stored in `record`.
    pub fn reconstruct(&self, record: &QueuedCommandRecord) -> CommandResult<Box<dyn DynCommand>> {
        let entry = self
            .entries
            .get(record.command_type.as_str())
            .ok_or_else(|| CommandError::UnknownCommand(record.command_type.clone()))?;

        (entry.decode)(&record.parameters).map_err(|e| CommandError::CorruptRecord {
            id: record.id.get(),
            reason: e.to_string(),
        })
    }
}
