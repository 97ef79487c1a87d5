//! Lanes pause while a resource they depend on is banned.
//!
//! These run with the tokio clock paused so ban windows elapse instantly.

mod common;

use common::{event_counts, events, scheduler, FlakyProvider, HashProbe, Probe};
use reel_commands::{InMemoryQueueStore, ProcessorStatus, GENERAL_LANE, HASHER_LANE};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_banned_lane_waits_while_independent_lane_drains() {
    let scheduler = scheduler(Arc::new(InMemoryQueueStore::new()));
    scheduler.bans().raise_ban("anidb_udp", Duration::from_secs(5));
    scheduler.start().await.unwrap();

    scheduler.submit(Probe::new("ban-window", "series-1", "general ran")).await.unwrap();
    scheduler
        .submit(HashProbe {
            scenario: "ban-window".into(),
            path: "/media/a.mkv".into(),
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(events("ban-window"), vec!["hashed /media/a.mkv"]);

    let state = scheduler.processor_state(GENERAL_LANE).await.unwrap();
    assert_eq!(state.status, ProcessorStatus::Paused);
    assert!(!state.paused_manually);
    assert_eq!(state.banned_resource.as_deref(), Some("anidb_udp"));
    assert!(state.resume_at.is_some());
    assert_eq!(state.queue_depth, 1);

    tokio::time::sleep(Duration::from_millis(4_800)).await;
    assert_eq!(events("ban-window").len(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(events("ban-window"), vec!["hashed /media/a.mkv", "general ran"]);

    let state = scheduler.processor_state(GENERAL_LANE).await.unwrap();
    assert!(state.resume_at.is_none());
    scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_clearing_ban_resumes_lane_early() {
    let scheduler = scheduler(Arc::new(InMemoryQueueStore::new()));
    scheduler.bans().raise_ban("anidb_udp", Duration::from_secs(3_600));
    scheduler.start().await.unwrap();

    scheduler.submit(Probe::new("ban-clear", "a", "ran")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(events("ban-clear").is_empty());

    assert!(scheduler.clear_ban("anidb_udp"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(events("ban-clear"), vec!["ran"]);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_ban_raised_while_idle_pauses_lane() {
    let scheduler = scheduler(Arc::new(InMemoryQueueStore::new()));
    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    scheduler.bans().raise_ban("anidb_udp", Duration::from_secs(30));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let state = scheduler.processor_state(GENERAL_LANE).await.unwrap();
    assert!(state.is_paused());
    let hasher = scheduler.processor_state(HASHER_LANE).await.unwrap();
    assert_eq!(hasher.status, ProcessorStatus::Idle);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_backoff_resubmits_and_retries_after_ban() {
    let scheduler = scheduler(Arc::new(InMemoryQueueStore::new()));
    scheduler.start().await.unwrap();

    scheduler
        .submit(FlakyProvider {
            scenario: "backoff".into(),
            resource: "anidb_udp".into(),
            ban_secs: 10,
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(events("backoff"), vec!["attempt"]);
    assert!(scheduler.bans().is_banned("anidb_udp"));

    let state = scheduler.processor_state(GENERAL_LANE).await.unwrap();
    assert!(state.is_paused());
    assert_eq!(state.queue_depth, 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let counts = event_counts("backoff");
    assert_eq!(counts.get("attempt"), Some(&2));
    assert_eq!(counts.get("done"), Some(&1));

    let state = scheduler.processor_state(GENERAL_LANE).await.unwrap();
    assert_eq!(state.queue_depth, 0);
    assert_eq!(state.failed, 0);
    scheduler.shutdown().await.unwrap();
}
