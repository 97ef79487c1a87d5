//! In-memory queue store.
//!
//! Nothing survives a restart. Used by tests and by deployments that accept
//! losing the queue.

use super::{resolve_conflict, ConflictResolution, EnqueueOutcome, QueueStore, QueuedCommandRecord, RecordId};
use crate::command::CommandSpec;
use crate::error::CommandResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    next_sequence: i64,
    records: HashMap<RecordId, QueuedCommandRecord>,
}

impl MemoryState {
    fn insert(&mut self, spec: &CommandSpec) -> RecordId {
        self.next_id += 1;
        self.next_sequence += 1;
        let id = RecordId::new(self.next_id);
        self.records.insert(
            id,
            QueuedCommandRecord {
                id,
                dedup_key: spec.dedup_key.clone(),
                command_type: spec.command_type.clone(),
                lane: spec.lane.clone(),
                priority: spec.priority,
                submitted_at: self.next_sequence,
                parameters: spec.parameters.clone(),
            },
        );
        id
    }

    fn holder(&self, lane: &str, dedup_key: &str) -> Option<&QueuedCommandRecord> {
        self.records
            .values()
            .find(|r| r.lane == lane && r.dedup_key == dedup_key)
    }

    fn lane(&self, lane: &str) -> impl Iterator<Item = &QueuedCommandRecord> {
        let lane = lane.to_string();
        self.records.values().filter(move |r| r.lane == lane)
    }
}

/// Queue store holding records in process memory.
#[derive(Default)]
pub struct InMemoryQueueStore {
    state: Mutex<MemoryState>,
}

impl InMemoryQueueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn try_enqueue(&self, spec: &CommandSpec) -> CommandResult<EnqueueOutcome> {
        let mut state = self.state.lock();
        let existing = state.holder(&spec.lane, &spec.dedup_key).map(|r| r.id);

        let outcome = match resolve_conflict(existing, spec.conflict) {
            ConflictResolution::Insert => EnqueueOutcome::Inserted(state.insert(spec)),
            ConflictResolution::Keep(id) => EnqueueOutcome::Skipped(id),
            ConflictResolution::Replace(removed) => {
                state.records.remove(&removed);
                let inserted = state.insert(spec);
                EnqueueOutcome::Replaced { removed, inserted }
            }
        };

        debug!(lane = %spec.lane, dedup_key = %spec.dedup_key, outcome = outcome.as_str(), "Enqueue resolved");
        Ok(outcome)
    }

    async fn load_all(&self, lane: &str) -> CommandResult<Vec<QueuedCommandRecord>> {
        let state = self.state.lock();
        let mut records: Vec<QueuedCommandRecord> = state.lane(lane).cloned().collect();
        records.sort_by(|a, b| a.drain_order(b));
        Ok(records)
    }

    async fn peek_next(&self, lane: &str) -> CommandResult<Option<QueuedCommandRecord>> {
        let state = self.state.lock();
        Ok(state.lane(lane).min_by(|a, b| a.drain_order(b)).cloned())
    }

    async fn remove(&self, id: RecordId) -> CommandResult<bool> {
        Ok(self.state.lock().records.remove(&id).is_some())
    }

    async fn find_by_key(&self, lane: &str, dedup_key: &str) -> CommandResult<Option<QueuedCommandRecord>> {
        Ok(self.state.lock().holder(lane, dedup_key).cloned())
    }

    async fn count(&self, lane: &str) -> CommandResult<u64> {
        Ok(self.state.lock().lane(lane).count() as u64)
    }

    async fn clear_lane(&self, lane: &str) -> CommandResult<u64> {
        let mut state = self.state.lock();
        let before = state.records.len();
        state.records.retain(|_, r| r.lane != lane);
        Ok((before - state.records.len()) as u64)
    }
}
