//! Shared commands and helpers for processor integration tests.
//!
//! Commands record what they did into a process-wide event log keyed by
//! scenario name, so tests running in parallel do not see each other.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use reel_commands::{
    BanSignal, Command, CommandContext, CommandDescription, CommandError, CommandRegistry, CommandScheduler,
    CommandsConfig, ConflictPolicy, Execution, InlineOptions, LaneConfig, QueueStore, GENERAL_LANE, HASHER_LANE,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

static EVENTS: Mutex<Vec<(String, String)>> = parking_lot::const_mutex(Vec::new());

/// Append an event for a scenario.
pub fn record(scenario: &str, event: impl Into<String>) {
    EVENTS.lock().push((scenario.to_string(), event.into()));
}

/// Events recorded for a scenario, in order.
pub fn events(scenario: &str) -> Vec<String> {
    EVENTS
        .lock()
        .iter()
        .filter(|(s, _)| s == scenario)
        .map(|(_, e)| e.clone())
        .collect()
}

/// Records its label when executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Probe {
    pub scenario: String,
    pub key: String,
    pub label: String,
}

impl Probe {
    pub fn new(scenario: &str, key: &str, label: &str) -> Self {
        Self {
            scenario: scenario.into(),
            key: key.into(),
            label: label.into(),
        }
    }
}

#[async_trait]
impl Command for Probe {
    const NAME: &'static str = "probe";

    fn dedup_key(&self) -> String {
        self.key.clone()
    }

    fn describe(&self) -> CommandDescription {
        CommandDescription::new("Probing").param("label", &self.label)
    }

    async fn execute(&self, _ctx: &CommandContext) -> Result<Execution, CommandError> {
        record(&self.scenario, self.label.clone());
        Ok(Execution::Completed)
    }
}

/// Like [`Probe`], but a duplicate submission replaces the queued one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacingProbe {
    pub scenario: String,
    pub key: String,
    pub label: String,
}

#[async_trait]
impl Command for ReplacingProbe {
    const NAME: &'static str = "replacing_probe";
    const CONFLICT: ConflictPolicy = ConflictPolicy::ReplaceExisting;

    fn dedup_key(&self) -> String {
        self.key.clone()
    }

    async fn execute(&self, _ctx: &CommandContext) -> Result<Execution, CommandError> {
        record(&self.scenario, self.label.clone());
        Ok(Execution::Completed)
    }
}

/// Runs on the hasher lane, which depends on no provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashProbe {
    pub scenario: String,
    pub path: String,
}

#[async_trait]
impl Command for HashProbe {
    const NAME: &'static str = "hash_probe";
    const LANE: &'static str = HASHER_LANE;

    fn dedup_key(&self) -> String {
        self.path.clone()
    }

    async fn execute(&self, _ctx: &CommandContext) -> Result<Execution, CommandError> {
        record(&self.scenario, format!("hashed {}", self.path));
        Ok(Execution::Completed)
    }
}

/// Fails with an error, or panics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failing {
    pub scenario: String,
    pub key: String,
    pub panic: bool,
}

#[async_trait]
impl Command for Failing {
    const NAME: &'static str = "failing";

    fn dedup_key(&self) -> String {
        self.key.clone()
    }

    async fn execute(&self, _ctx: &CommandContext) -> Result<Execution, CommandError> {
        record(&self.scenario, format!("attempt {}", self.key));
        if self.panic {
            panic!("probe panicked on {}", self.key);
        }
        Err(CommandError::failed(format!("provider rejected {}", self.key)))
    }
}

/// Backs off on its first attempt and completes on the next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlakyProvider {
    pub scenario: String,
    pub resource: String,
    pub ban_secs: u64,
}

#[async_trait]
impl Command for FlakyProvider {
    const NAME: &'static str = "flaky_provider";

    fn dedup_key(&self) -> String {
        self.resource.clone()
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<Execution, CommandError> {
        let attempts = events(&self.scenario).iter().filter(|e| *e == "attempt").count();
        record(&self.scenario, "attempt");
        if attempts == 0 {
            ctx.resubmit(self).await?;
            return Ok(Execution::Backoff(BanSignal::new(
                self.resource.clone(),
                Duration::from_secs(self.ban_secs),
            )));
        }
        record(&self.scenario, "done");
        Ok(Execution::Completed)
    }
}

/// Takes a while; records when it starts and when it finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slow {
    pub scenario: String,
    pub key: String,
    pub secs: u64,
}

#[async_trait]
impl Command for Slow {
    const NAME: &'static str = "slow";
    const LANE: &'static str = HASHER_LANE;

    fn dedup_key(&self) -> String {
        self.key.clone()
    }

    async fn execute(&self, _ctx: &CommandContext) -> Result<Execution, CommandError> {
        record(&self.scenario, format!("started {}", self.key));
        tokio::time::sleep(Duration::from_secs(self.secs)).await;
        record(&self.scenario, format!("finished {}", self.key));
        Ok(Execution::Completed)
    }
}

/// Calls back into the scheduler while it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nested {
    pub scenario: String,
    pub key: String,
}

#[async_trait]
impl Command for Nested {
    const NAME: &'static str = "nested";

    fn dedup_key(&self) -> String {
        self.key.clone()
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<Execution, CommandError> {
        if ctx.is_inline() {
            record(&self.scenario, "inner");
            return Ok(Execution::Completed);
        }

        record(&self.scenario, "outer");

        // A duplicate of the executing record is kept out.
        let outcome = ctx.submit(self.clone()).await?;
        record(&self.scenario, format!("resubmit {}", outcome.as_str()));

        // Inline run of the same key must not remove the executing record.
        ctx.run_inline(self.clone(), InlineOptions::propagate()).await?;
        let depth = ctx.scheduler().processor_state(ctx.lane()).await?.queue_depth;
        record(&self.scenario, format!("depth {}", depth));

        // Inline run of another command from inside this lane.
        ctx.run_inline(Probe::new(&self.scenario, "nested-probe", "probe"), InlineOptions::propagate())
            .await?;
        Ok(Execution::Completed)
    }
}

/// Registry with every test command.
pub fn registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry
        .register::<Probe>()
        .register::<ReplacingProbe>()
        .register::<HashProbe>()
        .register::<Failing>()
        .register::<FlakyProvider>()
        .register::<Nested>()
        .register::<Slow>();
    registry
}

/// General lane depends on `anidb_udp`; hasher depends on nothing.
pub fn config() -> CommandsConfig {
    CommandsConfig {
        lanes: vec![
            LaneConfig::new(GENERAL_LANE, ["anidb_udp"]),
            LaneConfig::local(HASHER_LANE),
        ],
        store_retry_interval_ms: 50,
        shutdown_timeout_secs: 5,
        ..CommandsConfig::default()
    }
}

pub fn scheduler(store: Arc<dyn QueueStore>) -> CommandScheduler {
    CommandScheduler::new(config(), store, registry()).expect("valid scheduler config")
}

/// Poll until `lane` is idle with an empty queue.
pub async fn wait_drained(scheduler: &CommandScheduler, lane: &str) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let state = scheduler.processor_state(lane).await.expect("lane state");
            if state.is_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("lane did not drain in time");
}

/// Counts each distinct event of a scenario.
pub fn event_counts(scenario: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for event in events(scenario) {
        *counts.entry(event).or_insert(0) += 1;
    }
    counts
}
