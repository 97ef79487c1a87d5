//! Command scheduler.
//!
//! The scheduler is the process-wide entry point of the command processor. It
//! owns the queue store, the registry, the ban coordinator and one processor
//! per lane. Construct it once at startup and clone it into whatever submits
//! commands; clones share the same state.

use crate::ban::{BanCoordinator, BanSignal};
use crate::command::{qualified_key, Command, CommandSpec, Execution, Submission};
use crate::config::CommandsConfig;
use crate::context::CommandContext;
use crate::error::{CommandError, CommandResult};
use crate::metrics::{CommandMetrics, LaneMetrics};
use crate::processor::{discard_reason, panic_message, Lane, Processor};
use crate::registry::CommandRegistry;
use crate::state::ProcessorState;
use crate::store::{EnqueueOutcome, QueueStore};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Options for [`CommandScheduler::run_inline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineOptions {
    /// Return failures to the caller instead of logging them.
    pub propagate_errors: bool,
}

impl InlineOptions {
    /// Failures come back as `Err`.
    pub const fn propagate() -> Self {
        Self { propagate_errors: true }
    }

    /// Failures are logged and reported as [`InlineOutcome::Swallowed`].
    pub const fn swallow() -> Self {
        Self { propagate_errors: false }
    }
}

impl Default for InlineOptions {
    fn default() -> Self {
        Self::propagate()
    }
}

/// Result of an inline run that did not propagate an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineOutcome {
    /// The command did its work.
    Completed,
    /// A provider ban stopped the command.
    Backoff(BanSignal),
    /// The command failed and the error was logged.
    Swallowed,
}

/// Counts from startup recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records reloaded and ready to run.
    pub restored: u64,
    /// Unreadable records removed.
    pub discarded: u64,
}

struct SchedulerInner {
    config: CommandsConfig,
    store: Arc<dyn QueueStore>,
    registry: CommandRegistry,
    bans: Arc<BanCoordinator>,
    lanes: HashMap<String, Arc<Lane>>,
    lane_order: Vec<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

/// Process-wide command scheduler.
#[derive(Clone)]
pub struct CommandScheduler {
    inner: Arc<SchedulerInner>,
}

impl CommandScheduler {
    /// Create a scheduler with its own ban coordinator.
    pub fn new(config: CommandsConfig, store: Arc<dyn QueueStore>, registry: CommandRegistry) -> CommandResult<Self> {
        Self::with_bans(config, store, registry, Arc::new(BanCoordinator::new()))
    }

    /// Create a scheduler sharing an existing ban coordinator.
    pub fn with_bans(
        config: CommandsConfig,
        store: Arc<dyn QueueStore>,
        registry: CommandRegistry,
        bans: Arc<BanCoordinator>,
    ) -> CommandResult<Self> {
        if config.lanes.is_empty() {
            return Err(CommandError::Configuration("at least one lane is required".into()));
        }

        let mut lanes = HashMap::new();
        let mut lane_order = Vec::new();
        for lane in &config.lanes {
            if lanes.insert(lane.name.clone(), Arc::new(Lane::new(lane))).is_some() {
                return Err(CommandError::Configuration(format!("duplicate lane: {}", lane.name)));
            }
            lane_order.push(lane.name.clone());
        }

        let lane_names: HashSet<&str> = lane_order.iter().map(String::as_str).collect();
        for command_type in registry.command_types() {
            if let Some(entry) = registry.entry(command_type) {
                if !lane_names.contains(entry.lane) {
                    warn!(
                        command_type = %command_type,
                        lane = %entry.lane,
                        "Command type defaults to a lane that is not configured"
                    );
                }
            }
        }

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                store,
                registry,
                bans,
                lanes,
                lane_order,
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
            }),
        })
    }

    /// Provider ban state.
    pub fn bans(&self) -> &BanCoordinator {
        &self.inner.bans
    }

    /// Shared handle to the ban coordinator, for connection-health monitors.
    pub fn ban_coordinator(&self) -> Arc<BanCoordinator> {
        self.inner.bans.clone()
    }

    /// The command registry.
    pub fn registry(&self) -> &CommandRegistry {
        &self.inner.registry
    }

    /// Engine configuration.
    pub fn config(&self) -> &CommandsConfig {
        &self.inner.config
    }

    pub(crate) fn store(&self) -> &dyn QueueStore {
        self.inner.store.as_ref()
    }

    /// Configured lane names, in configuration order.
    pub fn lanes(&self) -> &[String] {
        &self.inner.lane_order
    }

    /// Returns true once [`start`](Self::start) has succeeded.
    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    fn lane(&self, name: &str) -> CommandResult<&Arc<Lane>> {
        self.inner
            .lanes
            .get(name)
            .ok_or_else(|| CommandError::UnknownLane(name.to_string()))
    }

    /// Queue a command with its type's defaults.
    pub async fn submit<C: Command>(&self, command: C) -> CommandResult<EnqueueOutcome> {
        self.submit_with(Submission::new(command)).await
    }

    /// Queue a command with overrides.
    pub async fn submit_with<C: Command>(&self, submission: Submission<C>) -> CommandResult<EnqueueOutcome> {
        if !self.inner.registry.contains(C::NAME) {
            return Err(CommandError::UnknownCommand(C::NAME.to_string()));
        }
        self.enqueue_spec(submission.build()?).await
    }

    pub(crate) async fn enqueue_spec(&self, spec: CommandSpec) -> CommandResult<EnqueueOutcome> {
        let lane = self.lane(&spec.lane)?;
        let outcome = self.inner.store.try_enqueue(&spec).await?;

        CommandMetrics::command_enqueued(&spec.lane, &spec.command_type, outcome.as_str());
        match outcome {
            EnqueueOutcome::Skipped(existing) => {
                debug!(
                    lane = %spec.lane,
                    dedup_key = %spec.dedup_key,
                    existing = %existing,
                    "Command already queued, keeping existing"
                );
            }
            _ => {
                debug!(
                    lane = %spec.lane,
                    dedup_key = %spec.dedup_key,
                    priority = %spec.priority,
                    outcome = outcome.as_str(),
                    "Command queued"
                );
                lane.wake();
            }
        }

        Ok(outcome)
    }

    /// Run a command on the caller's task, bypassing the queue.
    ///
    /// The run is independent of any queued record with the same dedup key.
    /// When it completes, queued records with that key on any lane are
    /// removed, since their work has been done. A record already executing
    /// is left to finish.
    pub async fn run_inline<C: Command>(&self, command: C, options: InlineOptions) -> CommandResult<InlineOutcome> {
        let lane = self.lane(C::LANE)?.clone();
        let dedup_key = qualified_key(C::NAME, &command.dedup_key());

        if let Some(ban) = self.inner.bans.blocking(&lane.resources) {
            CommandMetrics::command_inline(C::NAME, "banned");
            return self.inline_backoff(C::NAME, &dedup_key, ban, options);
        }

        let ctx = CommandContext::new(self.clone(), lane.name.clone(), None);
        let span = info_span!(
            "inline_command",
            lane = %lane.name,
            command_type = C::NAME,
            dedup_key = %dedup_key
        );

        let result = AssertUnwindSafe(command.execute(&ctx))
            .catch_unwind()
            .instrument(span)
            .await;

        let error = match result {
            Ok(Ok(Execution::Completed)) => {
                CommandMetrics::command_inline(C::NAME, "completed");
                self.supersede(&dedup_key).await;
                return Ok(InlineOutcome::Completed);
            }
            Ok(Ok(Execution::Backoff(signal))) => {
                CommandMetrics::command_inline(C::NAME, "backoff");
                self.inner.bans.apply(signal.clone());
                return self.inline_backoff(C::NAME, &dedup_key, signal, options);
            }
            Ok(Err(e)) => {
                if let CommandError::Banned { resource, resume_at } = &e {
                    self.inner.bans.raise_ban_until(resource, *resume_at);
                }
                e
            }
            Err(panic) => CommandError::Internal(format!("command panicked: {}", panic_message(panic.as_ref()))),
        };

        CommandMetrics::command_inline(C::NAME, "failed");
        if options.propagate_errors {
            Err(error)
        } else {
            warn!(
                command_type = C::NAME,
                dedup_key = %dedup_key,
                error = %error,
                "Inline command failed"
            );
            Ok(InlineOutcome::Swallowed)
        }
    }

    fn inline_backoff(
        &self,
        command_type: &str,
        dedup_key: &str,
        ban: BanSignal,
        options: InlineOptions,
    ) -> CommandResult<InlineOutcome> {
        if options.propagate_errors {
            return Err(CommandError::Banned {
                resource: ban.resource,
                resume_at: ban.resume_at,
            });
        }
        info!(
            command_type = %command_type,
            dedup_key = %dedup_key,
            resource = %ban.resource,
            resume_at = %ban.resume_at,
            "Inline command held by provider ban"
        );
        Ok(InlineOutcome::Backoff(ban))
    }

    /// Drop queued copies of a key that an inline run just completed.
    ///
    /// Submissions may override the lane, so every lane is checked. The lane's
    /// dispatch lock keeps its processor from claiming the record between the
    /// in-flight check and the delete.
    async fn supersede(&self, dedup_key: &str) {
        for name in &self.inner.lane_order {
            if let Some(lane) = self.inner.lanes.get(name) {
                self.supersede_in(lane, dedup_key).await;
            }
        }
    }

    async fn supersede_in(&self, lane: &Lane, dedup_key: &str) {
        let _dispatch = lane.lock_dispatch().await;
        let queued = match self.inner.store.find_by_key(&lane.name, dedup_key).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!(lane = %lane.name, dedup_key = %dedup_key, error = %e, "Failed to look up superseded command");
                return;
            }
        };

        if lane.in_flight() == Some(queued.id) {
            return;
        }

        match self.inner.store.remove(queued.id).await {
            Ok(_) => debug!(
                lane = %lane.name,
                dedup_key = %dedup_key,
                record_id = %queued.id,
                "Removed queued command superseded by inline run"
            ),
            Err(e) => warn!(lane = %lane.name, dedup_key = %dedup_key, error = %e, "Failed to remove superseded command"),
        }
    }

    /// Snapshot of a lane's processor.
    pub async fn processor_state(&self, lane: &str) -> CommandResult<ProcessorState> {
        let lane = self.lane(lane)?;
        let depth = self.inner.store.count(&lane.name).await?;
        Ok(lane.state(depth))
    }

    /// Snapshots of every lane, in configuration order.
    pub async fn processor_states(&self) -> CommandResult<Vec<ProcessorState>> {
        let mut states = Vec::with_capacity(self.inner.lane_order.len());
        for name in &self.inner.lane_order {
            states.push(self.processor_state(name).await?);
        }
        Ok(states)
    }

    /// Hold a lane after its current command finishes.
    pub fn pause_lane(&self, lane: &str) -> CommandResult<()> {
        self.lane(lane)?.set_paused(true);
        info!(lane = %lane, "Lane paused");
        Ok(())
    }

    /// Release a paused lane.
    pub fn resume_lane(&self, lane: &str) -> CommandResult<()> {
        self.lane(lane)?.set_paused(false);
        info!(lane = %lane, "Lane resumed");
        Ok(())
    }

    /// Lift a provider ban early. Returns true if one was active.
    pub fn clear_ban(&self, resource: &str) -> bool {
        self.inner.bans.clear_ban(resource)
    }

    /// Delete every queued record of a lane.
    ///
    /// A command already executing runs to completion.
    pub async fn clear_lane(&self, lane: &str) -> CommandResult<u64> {
        let lane = self.lane(lane)?;
        let removed = self.inner.store.clear_lane(&lane.name).await?;
        LaneMetrics::update_pending(&lane.name, 0);
        Ok(removed)
    }

    /// Reload persisted work and start one processor per lane.
    pub async fn start(&self) -> CommandResult<RecoveryReport> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CommandError::Scheduler("scheduler already started".into()));
        }

        let report = match self.recover().await {
            Ok(report) => report,
            Err(e) => {
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let mut tasks = self.inner.tasks.lock();
        for name in &self.inner.lane_order {
            let lane = self.inner.lanes[name].clone();
            lane.restart();
            let processor = Processor::new(lane, self.clone());
            tasks.push(tokio::spawn(
                processor
                    .run()
                    .instrument(info_span!("processor", lane = %name)),
            ));
        }

        info!(
            lanes = ?self.inner.lane_order,
            restored = report.restored,
            discarded = report.discarded,
            "Command scheduler started"
        );
        Ok(report)
    }

    async fn recover(&self) -> CommandResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for name in &self.inner.lane_order {
            let records = self.inner.store.load_all(name).await?;
            let mut restored = 0_u64;

            for record in records {
                match self.inner.registry.reconstruct(&record) {
                    Ok(_) => restored += 1,
                    Err(e) => {
                        warn!(
                            lane = %name,
                            record_id = %record.id,
                            command_type = %record.command_type,
                            error = %e,
                            "Discarding unreadable command record"
                        );
                        CommandMetrics::command_discarded(name, discard_reason(&e));
                        self.inner.store.remove(record.id).await?;
                        report.discarded += 1;
                    }
                }
            }

            if restored > 0 {
                info!(lane = %name, restored, "Restored queued commands");
            }
            LaneMetrics::update_pending(name, restored);
            report.restored += restored;
        }

        Ok(report)
    }

    /// Stop every processor, letting in-flight commands finish.
    ///
    /// Commands are never interrupted. While any is still running, a warning
    /// naming the busy lanes is logged every `shutdown_timeout_secs`.
    pub async fn shutdown(&self) -> CommandResult<()> {
        info!("Shutting down command scheduler...");
        for lane in self.inner.lanes.values() {
            lane.stop();
        }

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        let interval = self.inner.config.shutdown_timeout();
        let stopped = join_all(tasks);
        tokio::pin!(stopped);

        let results = loop {
            match tokio::time::timeout(interval, stopped.as_mut()).await {
                Ok(results) => break results,
                Err(_) => {
                    let busy: Vec<&str> = self
                        .inner
                        .lane_order
                        .iter()
                        .filter(|name| self.inner.lanes[*name].in_flight().is_some())
                        .map(String::as_str)
                        .collect();
                    warn!(lanes = ?busy, "Still waiting for in-flight commands to finish");
                }
            }
        };

        for result in results {
            if let Err(e) = result {
                error!(error = %e, "Command processor task ended abnormally");
            }
        }

        self.inner.started.store(false, Ordering::SeqCst);
        info!("Command scheduler stopped");
        Ok(())
    }
}

impl std::fmt::Debug for CommandScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandScheduler")
            .field("lanes", &self.inner.lane_order)
            .field("commands", &self.inner.registry.command_types())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
