//! Persistent queue store abstraction.
//!
//! The store is the single source of truth for pending commands. Every lane's
//! processor reads from it and the scheduler writes to it; implementations
//! serialize their writes so a check-and-insert can never race.

mod memory;
mod sqlite;

pub use memory::InMemoryQueueStore;
pub use sqlite::SqliteQueueStore;

use crate::command::{CommandSpec, ConflictPolicy, Priority};
use crate::error::CommandResult;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::fmt;

/// Store-assigned identity of a queued record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(i64);

impl RecordId {
    /// Wraps a raw id.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable form of a queued command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommandRecord {
    /// Record id.
    pub id: RecordId,
    /// Namespaced dedup key.
    pub dedup_key: String,
    /// Command type name.
    pub command_type: String,
    /// Lane.
    pub lane: String,
    /// Priority, lower first.
    pub priority: Priority,
    /// Monotonic submission sequence number.
    pub submitted_at: i64,
    /// Serialized parameters.
    pub parameters: Vec<u8>,
}

impl QueuedCommandRecord {
    /// Drain order: priority ascending, then submission ascending.
    pub fn drain_order(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.submitted_at.cmp(&other.submitted_at))
            .then(self.id.cmp(&other.id))
    }
}

/// Result of a check-and-insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// No record held the key; a new one was inserted.
    Inserted(RecordId),
    /// A record already held the key and was kept.
    Skipped(RecordId),
    /// The record holding the key was deleted and a new one inserted.
    Replaced {
        /// Id of the deleted record.
        removed: RecordId,
        /// Id of the new record.
        inserted: RecordId,
    },
}

impl EnqueueOutcome {
    /// Id of the record that now holds the key.
    pub fn record_id(&self) -> RecordId {
        match *self {
            EnqueueOutcome::Inserted(id) | EnqueueOutcome::Skipped(id) => id,
            EnqueueOutcome::Replaced { inserted, .. } => inserted,
        }
    }

    /// Returns true if a new record was written.
    pub fn is_new_record(&self) -> bool {
        !matches!(self, EnqueueOutcome::Skipped(_))
    }

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnqueueOutcome::Inserted(_) => "inserted",
            EnqueueOutcome::Skipped(_) => "skipped",
            EnqueueOutcome::Replaced { .. } => "replaced",
        }
    }
}

/// Queue store trait for different backends.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Atomically insert `spec` unless its dedup key is already queued in the
    /// lane, resolving the conflict by the spec's policy.
    async fn try_enqueue(&self, spec: &CommandSpec) -> CommandResult<EnqueueOutcome>;

    /// All records of a lane in drain order.
    async fn load_all(&self, lane: &str) -> CommandResult<Vec<QueuedCommandRecord>>;

    /// The record the lane should run next.
    async fn peek_next(&self, lane: &str) -> CommandResult<Option<QueuedCommandRecord>>;

    /// Delete a record. Returns false if it was already gone.
    async fn remove(&self, id: RecordId) -> CommandResult<bool>;

    /// The record holding `dedup_key` in the lane, if any.
    async fn find_by_key(&self, lane: &str, dedup_key: &str) -> CommandResult<Option<QueuedCommandRecord>>;

    /// Number of records queued in the lane.
    async fn count(&self, lane: &str) -> CommandResult<u64>;

    /// Delete every record of the lane, returning how many were removed.
    async fn clear_lane(&self, lane: &str) -> CommandResult<u64>;
}

/// Decides what an enqueue does given the record currently holding the key.
pub(crate) fn resolve_conflict(existing: Option<RecordId>, policy: ConflictPolicy) -> ConflictResolution {
    match (existing, policy) {
        (None, _) => ConflictResolution::Insert,
        (Some(id), ConflictPolicy::KeepExisting) => ConflictResolution::Keep(id),
        (Some(id), ConflictPolicy::ReplaceExisting) => ConflictResolution::Replace(id),
    }
}

/// Resolution of an enqueue against the current holder of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConflictResolution {
    Insert,
    Keep(RecordId),
    Replace(RecordId),
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_conflict() {
        let id = RecordId::new(7);
        assert_eq!(resolve_conflict(None, ConflictPolicy::KeepExisting), ConflictResolution::Insert);
        assert_eq!(resolve_conflict(Some(id), ConflictPolicy::KeepExisting), ConflictResolution::Keep(id));
        assert_eq!(
            resolve_conflict(Some(id), ConflictPolicy::ReplaceExisting),
            ConflictResolution::Replace(id)
        );
    }

    #[test]
    fn test_outcome_accessors() {
        let replaced = EnqueueOutcome::Replaced {
            removed: RecordId::new(1),
            inserted: RecordId::new(2),
        };
        assert_eq!(replaced.record_id(), RecordId::new(2));
        assert!(replaced.is_new_record());
        assert!(!EnqueueOutcome::Skipped(RecordId::new(1)).is_new_record());
        assert_eq!(EnqueueOutcome::Inserted(RecordId::new(3)).as_str(), "inserted");
    }
}
