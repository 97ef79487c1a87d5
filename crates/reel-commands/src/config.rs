//! Command processor configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Name of the network-bound lane most provider commands run on.
pub const GENERAL_LANE: &str = "general";
/// Name of the CPU-bound lane used for file hashing.
pub const HASHER_LANE: &str = "hasher";
/// Name of the lane used for artwork downloads.
pub const IMAGES_LANE: &str = "images";

/// Configuration for the command processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Queue store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Lanes to run, each with its own processor.
    #[serde(default = "default_lanes")]
    pub lanes: Vec<LaneConfig>,

    /// Delay before retrying after the store failed to return the next record.
    #[serde(default = "default_store_retry_interval")]
    pub store_retry_interval_ms: u64,

    /// Interval at which shutdown reports commands it is still waiting for.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            lanes: default_lanes(),
            store_retry_interval_ms: default_store_retry_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl CommandsConfig {
    /// Returns the store retry interval as a Duration.
    pub fn store_retry_interval(&self) -> Duration {
        Duration::from_millis(self.store_retry_interval_ms)
    }

    /// Returns the shutdown timeout as a Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Looks up a lane by name.
    pub fn lane(&self, name: &str) -> Option<&LaneConfig> {
        self.lanes.iter().find(|lane| lane.name == name)
    }
}

/// A named lane and the provider resources its commands depend on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneConfig {
    /// Lane name.
    pub name: String,

    /// Resources whose bans pause this lane.
    #[serde(default)]
    pub resources: Vec<String>,
}

impl LaneConfig {
    /// Creates a lane with the given resource dependencies.
    pub fn new(name: impl Into<String>, resources: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            resources: resources.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a lane that depends on no provider resources.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
        }
    }
}

fn default_lanes() -> Vec<LaneConfig> {
    vec![
        LaneConfig::new(GENERAL_LANE, ["anidb_udp", "anidb_http"]),
        LaneConfig::local(HASHER_LANE),
        LaneConfig::new(IMAGES_LANE, ["anidb_http"]),
    ]
}

fn default_store_retry_interval() -> u64 {
    1000
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Queue store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite URL of the queue database.
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl StoreConfig {
    /// Returns the connect timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_store_url() -> String {
    "sqlite://reel-commands.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_connect_timeout() -> u64 {
    5
}
