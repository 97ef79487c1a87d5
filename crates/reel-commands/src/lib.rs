//! Reel Commands - Persistent Command Processor
//!
//! The engine behind the media-library backend's background work:
//! - Typed command definitions with serde serialization
//! - Durable queue (SQLite, or in-memory for tests) surviving restarts
//! - Deduplication by key with explicit conflict policies
//! - Strict priority then FIFO ordering within a lane
//! - One processor per lane, paused while a provider it depends on is banned
//! - Inline execution on the caller's task
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Reel Commands Architecture                    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  submit / submit_with                 run_inline                 │
//! │     │                                     │                      │
//! │     ▼                                     │                      │
//! │  ┌──────────────────────────────┐         │                      │
//! │  │   CommandScheduler           │         │                      │
//! │  │   (registry, lanes, bans)    │◄────────┘                      │
//! │  └──────────────┬───────────────┘                                │
//! │                 │ try_enqueue (dedup + conflict policy)          │
//! │                 ▼                                                │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                 QueueStore (SQLite)                      │    │
//! │  │   general  │  hasher  │  images   ordered by priority,   │    │
//! │  │            │          │           then submission        │    │
//! │  └─────┬──────┴────┬─────┴─────┬──────────────────────────┘    │
//! │        ▼           ▼           ▼                                 │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐                         │
//! │  │Processor │ │Processor │ │Processor │ ◄── BanCoordinator      │
//! │  │ general  │ │ hasher   │ │ images   │     pauses lanes        │
//! │  └──────────┘ └──────────┘ └──────────┘                         │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use reel_commands::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct RefreshSeries {
//!     series_id: u64,
//! }
//!
//! #[async_trait::async_trait]
//! impl Command for RefreshSeries {
//!     const NAME: &'static str = "refresh_series";
//!     const PRIORITY: Priority = Priority::LOW;
//!
//!     fn dedup_key(&self) -> String {
//!         self.series_id.to_string()
//!     }
//!
//!     async fn execute(&self, ctx: &CommandContext) -> Result<Execution, CommandError> {
//!         if let Some(ban) = ctx.bans().active("anidb_http") {
//!             ctx.resubmit(self).await?;
//!             return Ok(Execution::Backoff(ban));
//!         }
//!         // Fetch and store series metadata
//!         Ok(Execution::Completed)
//!     }
//! }
//!
//! let mut registry = CommandRegistry::new();
//! registry.register::<RefreshSeries>();
//!
//! let store = Arc::new(SqliteQueueStore::connect(&config.store).await?);
//! let scheduler = CommandScheduler::new(config, store, registry)?;
//! scheduler.start().await?;
//! scheduler.submit(RefreshSeries { series_id: 42 }).await?;
//! ```

pub mod ban;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
mod processor;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod store;

pub use ban::{BanCoordinator, BanSignal};
pub use command::{Command, CommandDescription, CommandSpec, ConflictPolicy, Execution, Priority, Submission};
pub use config::{CommandsConfig, LaneConfig, StoreConfig, GENERAL_LANE, HASHER_LANE, IMAGES_LANE};
pub use context::CommandContext;
pub use error::{CommandError, CommandResult};
pub use metrics::{register_metrics, BanMetrics, CommandMetrics, LaneMetrics};
pub use registry::{CommandRegistry, DynCommand};
pub use scheduler::{CommandScheduler, InlineOptions, InlineOutcome, RecoveryReport};
pub use state::{CurrentCommand, ProcessorState, ProcessorStatus};
pub use store::{EnqueueOutcome, InMemoryQueueStore, QueueStore, QueuedCommandRecord, RecordId, SqliteQueueStore};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::command::{Command, ConflictPolicy, Execution, Priority, Submission};
    pub use crate::registry::CommandRegistry;
    pub use crate::scheduler::{CommandScheduler, InlineOptions, InlineOutcome};
    pub use crate::store::SqliteQueueStore;
    pub use crate::{CommandContext, CommandError, CommandResult};
}
