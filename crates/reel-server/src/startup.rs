//! Server startup utilities.

use reel_commands::{CommandsConfig, RecoveryReport};
use tracing::info;

/// Prints the startup banner.
pub fn print_banner() {
    info!(r#"
    ____            __
   / __ \___  ___  / /
  / /_/ / _ \/ _ \/ /
 / _, _/  __/  __/ /
/_/ |_|\___/\___/_/

    Command Processor
    "#);
}

/// Prints lane layout and recovery results.
pub fn print_startup_info(config: &CommandsConfig, report: &RecoveryReport) {
    let separator = "=".repeat(60);
    info!("{}", separator);
    info!("Queue store: {}", config.store.url);
    for lane in &config.lanes {
        if lane.resources.is_empty() {
            info!("Lane {:<10} (no provider dependencies)", lane.name);
        } else {
            info!("Lane {:<10} depends on {}", lane.name, lane.resources.join(", "));
        }
    }
    info!("Restored:    {} queued command(s)", report.restored);
    if report.discarded > 0 {
        info!("Discarded:   {} unreadable record(s)", report.discarded);
    }
    info!("{}", separator);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_banner_does_not_panic() {
        let _ = tracing_subscriber::fmt::try_init();
        print_banner();
    }

    #[test]
    fn test_print_startup_info_does_not_panic() {
        let _ = tracing_subscriber::fmt::try_init();
        print_startup_info(
            &CommandsConfig::default(),
            &RecoveryReport {
                restored: 12,
                discarded: 1,
            },
        );
    }
}
