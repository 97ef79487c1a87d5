//! Failing commands never stop their lane.

mod common;

use async_trait::async_trait;
use common::{events, scheduler, wait_drained, Failing, Probe};
use reel_commands::{
    CommandError, CommandResult, CommandSpec, EnqueueOutcome, InMemoryQueueStore, Priority, QueueStore,
    QueuedCommandRecord, RecordId, Submission, GENERAL_LANE,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory store whose first few removals fail.
struct UnreliableRemoveStore {
    inner: InMemoryQueueStore,
    failures_left: AtomicU32,
}

impl UnreliableRemoveStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryQueueStore::new(),
            failures_left: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl QueueStore for UnreliableRemoveStore {
    async fn try_enqueue(&self, spec: &CommandSpec) -> CommandResult<EnqueueOutcome> {
        self.inner.try_enqueue(spec).await
    }

    async fn load_all(&self, lane: &str) -> CommandResult<Vec<QueuedCommandRecord>> {
        self.inner.load_all(lane).await
    }

    async fn peek_next(&self, lane: &str) -> CommandResult<Option<QueuedCommandRecord>> {
        self.inner.peek_next(lane).await
    }

    async fn remove(&self, id: RecordId) -> CommandResult<bool> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CommandError::Internal("disk I/O error".into()));
        }
        self.inner.remove(id).await
    }

    async fn find_by_key(&self, lane: &str, dedup_key: &str) -> CommandResult<Option<QueuedCommandRecord>> {
        self.inner.find_by_key(lane, dedup_key).await
    }

    async fn count(&self, lane: &str) -> CommandResult<u64> {
        self.inner.count(lane).await
    }

    async fn clear_lane(&self, lane: &str) -> CommandResult<u64> {
        self.inner.clear_lane(lane).await
    }
}

#[tokio::test]
async fn test_failed_and_panicked_commands_are_removed() {
    let store = Arc::new(InMemoryQueueStore::new());
    let scheduler = scheduler(store.clone());

    let failing = |key: &str, panic: bool| Failing {
        scenario: "failures".into(),
        key: key.into(),
        panic,
    };
    scheduler
        .submit_with(Submission::new(failing("error", false)).priority(Priority::CRITICAL))
        .await
        .unwrap();
    scheduler
        .submit_with(Submission::new(failing("panic", true)).priority(Priority::HIGH))
        .await
        .unwrap();
    scheduler.submit(Probe::new("failures", "after", "still running")).await.unwrap();

    scheduler.start().await.unwrap();
    wait_drained(&scheduler, GENERAL_LANE).await;

    assert_eq!(
        events("failures"),
        vec!["attempt error", "attempt panic", "still running"]
    );
    assert_eq!(store.count(GENERAL_LANE).await.unwrap(), 0);

    let state = scheduler.processor_state(GENERAL_LANE).await.unwrap();
    assert_eq!(state.processed, 3);
    assert_eq!(state.failed, 2);
    assert!(state.current_command.is_none());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_command_is_not_retried() {
    let scheduler = scheduler(Arc::new(InMemoryQueueStore::new()));
    scheduler.start().await.unwrap();

    scheduler
        .submit(Failing {
            scenario: "no-retry".into(),
            key: "once".into(),
            panic: false,
        })
        .await
        .unwrap();
    wait_drained(&scheduler, GENERAL_LANE).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(events("no-retry"), vec!["attempt once"]);
    scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_removal_waits_before_running_again() {
    let store = Arc::new(UnreliableRemoveStore::new(1));
    let scheduler = scheduler(store.clone());
    scheduler.start().await.unwrap();

    scheduler.submit(Probe::new("remove-retry", "series-9", "ran")).await.unwrap();

    // The record is still queued, but the lane holds off for the retry interval.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(events("remove-retry"), vec!["ran"]);
    assert_eq!(store.count(GENERAL_LANE).await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(events("remove-retry"), vec!["ran", "ran"]);
    assert_eq!(store.count(GENERAL_LANE).await.unwrap(), 0);

    scheduler.shutdown().await.unwrap();
}
