//! Processor state reporting.

use crate::ban::BanSignal;
use crate::command::CommandDescription;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a lane's processor is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorStatus {
    /// Waiting for work.
    Idle,
    /// Reading the next record from the store.
    FetchingNext,
    /// Running a command.
    Executing,
    /// Held by an operator or a provider ban.
    Paused,
    /// Shut down.
    Stopped,
}

impl ProcessorStatus {
    /// Returns the status as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorStatus::Idle => "idle",
            ProcessorStatus::FetchingNext => "fetching_next",
            ProcessorStatus::Executing => "executing",
            ProcessorStatus::Paused => "paused",
            ProcessorStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ProcessorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The command a processor is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentCommand {
    /// Type name.
    pub command_type: String,
    /// Namespaced dedup key.
    pub dedup_key: String,
    /// Description message.
    pub message: String,
    /// Description params.
    pub params: Vec<(String, String)>,
}

impl CurrentCommand {
    pub(crate) fn new(command_type: &str, dedup_key: &str, description: CommandDescription) -> Self {
        Self {
            command_type: command_type.to_string(),
            dedup_key: dedup_key.to_string(),
            message: description.message,
            params: description.params,
        }
    }
}

/// Point-in-time snapshot of a lane's processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorState {
    /// Lane name.
    pub lane: String,
    /// Current status.
    pub status: ProcessorStatus,
    /// Paused by an operator.
    pub paused_manually: bool,
    /// Resource whose ban holds the lane.
    pub banned_resource: Option<String>,
    /// Estimated end of the ban holding the lane.
    pub resume_at: Option<DateTime<Utc>>,
    /// Command being executed.
    pub current_command: Option<CurrentCommand>,
    /// Records waiting in the lane, including the one executing.
    pub queue_depth: u64,
    /// Commands finished since start, successful or not.
    pub processed: u64,
    /// Commands that failed or panicked since start.
    pub failed: u64,
}

impl ProcessorState {
    /// Returns true if the lane is held.
    pub fn is_paused(&self) -> bool {
        self.status == ProcessorStatus::Paused
    }

    /// Returns true if the lane has nothing to do.
    pub fn is_idle(&self) -> bool {
        self.status == ProcessorStatus::Idle && self.queue_depth == 0
    }
}

/// Mutable part of the state, owned by the lane.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub status: ProcessorStatus,
    pub paused_manually: bool,
    pub ban: Option<BanSignal>,
    pub current: Option<CurrentCommand>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            status: ProcessorStatus::Idle,
            paused_manually: false,
            ban: None,
            current: None,
        }
    }
}

impl Snapshot {
    pub fn to_state(&self, lane: &str, queue_depth: u64, processed: u64, failed: u64) -> ProcessorState {
        ProcessorState {
            lane: lane.to_string(),
            status: self.status,
            paused_manually: self.paused_manually,
            banned_resource: self.ban.as_ref().map(|b| b.resource.clone()),
            resume_at: self.ban.as_ref().map(|b| b.resume_at),
            current_command: self.current.clone(),
            queue_depth,
            processed,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_strings() {
        assert_eq!(ProcessorStatus::FetchingNext.to_string(), "fetching_next");
        assert_eq!(
            serde_json::to_string(&ProcessorStatus::Paused).unwrap(),
            "\"paused\""
        );
    }

    #[tokio::test]
    async fn test_snapshot_reports_ban() {
        let snapshot = Snapshot {
            status: ProcessorStatus::Paused,
            ban: Some(BanSignal::new("anidb_udp", Duration::from_secs(30))),
            ..Snapshot::default()
        };
        let state = snapshot.to_state("general", 3, 10, 1);

        assert!(state.is_paused());
        assert!(!state.is_idle());
        assert_eq!(state.banned_resource.as_deref(), Some("anidb_udp"));
        assert!(state.resume_at.unwrap() > Utc::now());
        assert_eq!(state.queue_depth, 3);
    }

    #[test]
    fn test_current_command_from_description() {
        let current = CurrentCommand::new(
            "hash_file",
            "hash_file:/a.mkv",
            CommandDescription::new("Hashing file").param("path", "/a.mkv"),
        );
        assert_eq!(current.message, "Hashing file");
        assert_eq!(current.params, vec![("path".to_string(), "/a.mkv".to_string())]);
    }
}
