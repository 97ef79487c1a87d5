//! Tracing subscriber setup.
//!
//! Builds a `tracing-subscriber` registry with an `EnvFilter` and either a
//! human-readable or a JSON formatting layer.

use crate::{ReelError, ReelResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive when `RUST_LOG` is not set.
const DEFAULT_DIRECTIVE: &str = "info,reel=debug,sqlx=warn";

/// Tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON lines instead of pretty output.
    #[serde(default)]
    pub json: bool,

    /// Include the event target in the output.
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

fn default_filter() -> String {
    DEFAULT_DIRECTIVE.to_string()
}

fn default_with_target() -> bool {
    true
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
            with_target: default_with_target(),
        }
    }
}

impl TracingConfig {
    /// Builds the env filter, preferring `RUST_LOG` over the configured directive.
    pub fn env_filter(&self) -> ReelResult<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.filter)
                .map_err(|e| ReelError::configuration(format!("Invalid log filter '{}': {}", self.filter, e))),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Fails if the filter directive does not parse or a global subscriber is
/// already installed.
pub fn init_tracing(config: &TracingConfig) -> ReelResult<()> {
    let filter = config.env_filter()?;

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(config.with_target))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(config.with_target))
            .try_init()
    };

    result.map_err(|e| ReelError::internal(format!("Failed to install tracing subscriber: {}", e)))?;

    tracing::debug!(json = config.json, filter = %config.filter, "Tracing initialized");
    Ok(())
}
