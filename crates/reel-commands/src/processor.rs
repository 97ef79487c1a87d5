//! Per-lane command processor.
//!
//! Each lane runs one processor task that drains the lane's records from the
//! queue store one at a time, in priority order. A processor holds off while
//! its lane is paused by an operator or any resource the lane depends on is
//! banned, and sleeps on the lane's wake notification when there is nothing
//! to do.

use crate::ban::BanSignal;
use crate::command::Execution;
use crate::config::LaneConfig;
use crate::context::CommandContext;
use crate::error::CommandError;
use crate::metrics::{CommandMetrics, LaneMetrics};
use crate::scheduler::CommandScheduler;
use crate::state::{CurrentCommand, ProcessorState, ProcessorStatus, Snapshot};
use crate::store::{QueuedCommandRecord, RecordId};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Operator control of a lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LaneControl {
    pub paused: bool,
    pub stopping: bool,
}

/// Shared state of a lane, seen by both its processor and the scheduler.
pub(crate) struct Lane {
    pub name: String,
    pub resources: Vec<String>,
    wake: Notify,
    control: watch::Sender<LaneControl>,
    snapshot: RwLock<Snapshot>,
    /// Held while the processor picks its next record, so a claim and a
    /// supersede of the same record cannot interleave.
    dispatch: AsyncMutex<()>,
    in_flight: Mutex<Option<RecordId>>,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl Lane {
    pub fn new(config: &LaneConfig) -> Self {
        let (control, _) = watch::channel(LaneControl::default());
        Self {
            name: config.name.clone(),
            resources: config.resources.clone(),
            wake: Notify::new(),
            control,
            snapshot: RwLock::new(Snapshot::default()),
            dispatch: AsyncMutex::new(()),
            in_flight: Mutex::new(None),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Wake the processor if it is idle. Stores a permit otherwise.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn set_paused(&self, paused: bool) {
        self.control.send_modify(|control| control.paused = paused);
    }

    pub fn stop(&self) {
        self.control.send_modify(|control| control.stopping = true);
    }

    /// Clear a previous stop so a new processor can run.
    pub fn restart(&self) {
        self.control.send_modify(|control| control.stopping = false);
    }

    pub fn is_stopping(&self) -> bool {
        self.control.borrow().stopping
    }

    /// Record currently executing on this lane's processor.
    pub fn in_flight(&self) -> Option<RecordId> {
        *self.in_flight.lock()
    }

    /// Wait until the processor is not between peeking a record and claiming it.
    pub async fn lock_dispatch(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.dispatch.lock().await
    }

    pub fn state(&self, queue_depth: u64) -> ProcessorState {
        self.snapshot.read().to_state(
            &self.name,
            queue_depth,
            self.processed.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }

    fn publish(&self, status: ProcessorStatus) {
        let mut snapshot = self.snapshot.write();
        if snapshot.status == ProcessorStatus::Paused && status != ProcessorStatus::Paused {
            LaneMetrics::update_paused(&self.name, false);
        }
        snapshot.status = status;
        snapshot.paused_manually = false;
        snapshot.ban = None;
    }

    fn publish_paused(&self, manually: bool, ban: Option<BanSignal>) {
        let mut snapshot = self.snapshot.write();
        snapshot.status = ProcessorStatus::Paused;
        snapshot.paused_manually = manually;
        snapshot.ban = ban;
        LaneMetrics::update_paused(&self.name, true);
    }

    pub fn claim(&self, id: RecordId) {
        *self.in_flight.lock() = Some(id);
    }

    fn release(&self) {
        *self.in_flight.lock() = None;
    }

    fn begin(&self, current: CurrentCommand) {
        let mut snapshot = self.snapshot.write();
        snapshot.status = ProcessorStatus::Executing;
        snapshot.current = Some(current);
    }

    fn finish(&self, failed: bool) {
        self.release();
        self.snapshot.write().current = None;
        self.processed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lane")
            .field("name", &self.name)
            .field("resources", &self.resources)
            .field("control", &*self.control.borrow())
            .finish_non_exhaustive()
    }
}

/// How one loop step ended.
enum Step {
    Continue,
    Exit,
}

/// Worker loop for a single lane.
pub(crate) struct Processor {
    lane: std::sync::Arc<Lane>,
    scheduler: CommandScheduler,
}

impl Processor {
    pub fn new(lane: std::sync::Arc<Lane>, scheduler: CommandScheduler) -> Self {
        Self { lane, scheduler }
    }

    /// Run until the lane is stopped.
    pub async fn run(self) {
        let mut control = self.lane.control.subscribe();
        let mut bans = self.scheduler.bans().subscribe();

        info!(lane = %self.lane.name, resources = ?self.lane.resources, "Command processor started");

        loop {
            let step = self.step(&mut control, &mut bans).await;
            if matches!(step, Step::Exit) {
                break;
            }
        }

        self.lane.publish(ProcessorStatus::Stopped);
        info!(
            lane = %self.lane.name,
            processed = self.lane.processed.load(Ordering::Relaxed),
            failed = self.lane.failed.load(Ordering::Relaxed),
            "Command processor stopped"
        );
    }

    async fn step(&self, control: &mut watch::Receiver<LaneControl>, bans: &mut watch::Receiver<u64>) -> Step {
        let state = *control.borrow_and_update();
        if state.stopping {
            return Step::Exit;
        }

        if state.paused {
            self.lane.publish_paused(true, None);
            debug!(lane = %self.lane.name, "Lane paused by operator");
            return match control.changed().await {
                Ok(()) => Step::Continue,
                Err(_) => Step::Exit,
            };
        }

        bans.borrow_and_update();
        if let Some(ban) = self.scheduler.bans().blocking(&self.lane.resources) {
            return self.wait_out_ban(ban, control, bans).await;
        }

        self.lane.publish(ProcessorStatus::FetchingNext);
        let next = {
            let _dispatch = self.lane.lock_dispatch().await;
            let next = self.scheduler.store().peek_next(&self.lane.name).await;
            if let Ok(Some(record)) = &next {
                self.lane.claim(record.id);
            }
            next
        };

        match next {
            Ok(Some(record)) => {
                if self.execute(record).await {
                    Step::Continue
                } else {
                    self.store_backoff(control).await
                }
            }
            Ok(None) => {
                self.lane.publish(ProcessorStatus::Idle);
                tokio::select! {
                    _ = self.lane.wake.notified() => Step::Continue,
                    changed = bans.changed() => if changed.is_ok() { Step::Continue } else { Step::Exit },
                    changed = control.changed() => if changed.is_ok() { Step::Continue } else { Step::Exit },
                }
            }
            Err(e) => {
                error!(lane = %self.lane.name, error = %e, "Failed to fetch next command");
                self.store_backoff(control).await
            }
        }
    }

    /// Give a failing store time to recover before touching it again.
    async fn store_backoff(&self, control: &mut watch::Receiver<LaneControl>) -> Step {
        let retry = self.scheduler.config().store_retry_interval();
        debug!(lane = %self.lane.name, retry_ms = retry.as_millis() as u64, "Waiting for queue store");
        self.lane.publish(ProcessorStatus::Idle);
        tokio::select! {
            _ = tokio::time::sleep(retry) => Step::Continue,
            changed = control.changed() => if changed.is_ok() { Step::Continue } else { Step::Exit },
        }
    }

    async fn wait_out_ban(
        &self,
        ban: BanSignal,
        control: &mut watch::Receiver<LaneControl>,
        bans: &mut watch::Receiver<u64>,
    ) -> Step {
        info!(
            lane = %self.lane.name,
            resource = %ban.resource,
            resume_at = %ban.resume_at,
            "Lane paused by provider ban"
        );
        let resume = ban.resume_instant;
        self.lane.publish_paused(false, Some(ban));

        tokio::select! {
            _ = tokio::time::sleep_until(resume) => {
                debug!(lane = %self.lane.name, "Ban estimate elapsed, re-checking");
                Step::Continue
            }
            changed = bans.changed() => if changed.is_ok() { Step::Continue } else { Step::Exit },
            changed = control.changed() => if changed.is_ok() { Step::Continue } else { Step::Exit },
        }
    }

    /// Run a claimed record. Returns false if the store could not remove it.
    async fn execute(&self, record: QueuedCommandRecord) -> bool {
        let lane = self.lane.name.as_str();

        let command = match self.scheduler.registry().reconstruct(&record) {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    lane = %lane,
                    record_id = %record.id,
                    command_type = %record.command_type,
                    error = %e,
                    "Dropping unreadable command record"
                );
                CommandMetrics::command_discarded(lane, discard_reason(&e));
                let removed = self.remove(record.id).await;
                self.lane.release();
                return removed;
            }
        };

        let command_type = command.command_type();
        self.lane
            .begin(CurrentCommand::new(command_type, &record.dedup_key, command.describe()));

        let ctx = CommandContext::new(self.scheduler.clone(), lane, Some(record.id));
        let span = info_span!(
            "command",
            lane = %lane,
            command_type = %command_type,
            dedup_key = %record.dedup_key,
            record_id = %record.id
        );

        let started = Instant::now();
        let result = AssertUnwindSafe(command.execute(&ctx))
            .catch_unwind()
            .instrument(span)
            .await;
        let elapsed = started.elapsed();

        let failed = match result {
            Ok(Ok(Execution::Completed)) => {
                debug!(lane = %lane, command_type = %command_type, dedup_key = %record.dedup_key, "Command completed");
                CommandMetrics::command_completed(lane, command_type, elapsed);
                false
            }
            Ok(Ok(Execution::Backoff(signal))) => {
                info!(
                    lane = %lane,
                    command_type = %command_type,
                    dedup_key = %record.dedup_key,
                    resource = %signal.resource,
                    "Command backed off on provider ban"
                );
                CommandMetrics::command_backoff(lane, command_type, &signal.resource, elapsed);
                self.scheduler.bans().apply(signal);
                false
            }
            Ok(Err(e)) => {
                if let CommandError::Banned { resource, resume_at } = &e {
                    self.scheduler.bans().raise_ban_until(resource, *resume_at);
                }
                warn!(
                    lane = %lane,
                    command_type = %command_type,
                    dedup_key = %record.dedup_key,
                    error = %e,
                    "Command failed"
                );
                CommandMetrics::command_failed(lane, command_type, "error", elapsed);
                true
            }
            Err(panic) => {
                error!(
                    lane = %lane,
                    command_type = %command_type,
                    dedup_key = %record.dedup_key,
                    panic = %panic_message(panic.as_ref()),
                    "Command panicked"
                );
                CommandMetrics::command_failed(lane, command_type, "panic", elapsed);
                true
            }
        };

        let removed = self.remove(record.id).await;
        self.lane.finish(failed);
        removed
    }

    async fn remove(&self, id: RecordId) -> bool {
        let store = self.scheduler.store();
        let removed = match store.remove(id).await {
            Ok(true) => true,
            // Replaced or cleared while it ran.
            Ok(false) => {
                debug!(lane = %self.lane.name, record_id = %id, "Record already gone");
                true
            }
            Err(e) => {
                error!(
                    lane = %self.lane.name,
                    record_id = %id,
                    error = %e,
                    "Failed to remove finished command; it stays queued and runs again"
                );
                false
            }
        };

        if let Ok(pending) = store.count(&self.lane.name).await {
            LaneMetrics::update_pending(&self.lane.name, pending);
        }
        removed
    }
}

pub(crate) fn discard_reason(err: &CommandError) -> &'static str {
    match err {
        CommandError::UnknownCommand(_) => "unknown_command",
        _ => "corrupt_record",
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
