//! Application builder.

use reel_commands::{
    Command, CommandError, CommandRegistry, CommandScheduler, ProcessorState, RecoveryReport, SqliteQueueStore,
};
use reel_config::AppConfig;
use reel_core::{ReelError, ReelResult};
use std::sync::Arc;
use tracing::info;

/// Application builder for constructing the server.
pub struct AppBuilder {
    config: Option<AppConfig>,
    registry: CommandRegistry,
}

impl AppBuilder {
    /// Creates a new application builder.
    pub fn new() -> Self {
        Self {
            config: None,
            registry: CommandRegistry::new(),
        }
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Registers a command type.
    pub fn register<C: Command>(mut self) -> Self {
        self.registry.register::<C>();
        self
    }

    /// Opens the queue store and builds the scheduler.
    pub async fn build(self) -> ReelResult<App> {
        let config = self.config.unwrap_or_default();

        let store = SqliteQueueStore::connect(&config.commands.store)
            .await
            .map_err(into_reel_error)?;
        let scheduler = CommandScheduler::new(config.commands.clone(), Arc::new(store), self.registry)
            .map_err(into_reel_error)?;

        info!(
            commands = ?scheduler.registry().command_types(),
            lanes = ?scheduler.lanes(),
            "Command scheduler ready"
        );
        Ok(App { config, scheduler })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A built application.
pub struct App {
    config: AppConfig,
    scheduler: CommandScheduler,
}

impl App {
    /// Application configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The command scheduler, for submitting work.
    pub fn scheduler(&self) -> &CommandScheduler {
        &self.scheduler
    }

    /// Restores persisted commands and starts every lane.
    pub async fn start(&self) -> ReelResult<RecoveryReport> {
        self.scheduler.start().await.map_err(into_reel_error)
    }

    /// Snapshots of every lane.
    pub async fn status(&self) -> ReelResult<Vec<ProcessorState>> {
        self.scheduler.processor_states().await.map_err(into_reel_error)
    }

    /// Stops every lane, letting in-flight commands finish.
    pub async fn shutdown(&self) -> ReelResult<()> {
        self.scheduler.shutdown().await.map_err(into_reel_error)
    }
}

fn into_reel_error(err: CommandError) -> ReelError {
    match err {
        CommandError::Configuration(msg) => ReelError::configuration(msg),
        CommandError::Database(e) => ReelError::from(e),
        other => ReelError::internal(other.to_string()),
    }
}
