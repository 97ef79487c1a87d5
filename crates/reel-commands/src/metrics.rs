//! Prometheus metrics for command processor monitoring.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the command processor.
pub mod names {
    /// Total submissions, labelled by enqueue outcome.
    pub const COMMANDS_ENQUEUED_TOTAL: &str = "reel_commands_enqueued_total";
    /// Total commands completed successfully.
    pub const COMMANDS_COMPLETED_TOTAL: &str = "reel_commands_completed_total";
    /// Total commands failed or panicked.
    pub const COMMANDS_FAILED_TOTAL: &str = "reel_commands_failed_total";
    /// Total commands that backed off because of a provider ban.
    pub const COMMANDS_BACKOFF_TOTAL: &str = "reel_commands_backoff_total";
    /// Total records dropped because they could not be reconstructed.
    pub const COMMANDS_DISCARDED_TOTAL: &str = "reel_commands_discarded_total";
    /// Total inline executions.
    pub const COMMANDS_INLINE_TOTAL: &str = "reel_commands_inline_total";

    /// Records waiting per lane.
    pub const COMMANDS_PENDING: &str = "reel_commands_pending";
    /// Whether a lane is paused (1) or not (0).
    pub const LANE_PAUSED: &str = "reel_commands_lane_paused";

    /// Command execution duration in seconds.
    pub const COMMAND_DURATION_SECONDS: &str = "reel_command_duration_seconds";

    /// Total provider bans raised.
    pub const BANS_RAISED_TOTAL: &str = "reel_commands_bans_raised_total";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::COMMANDS_ENQUEUED_TOTAL,
        "Total number of command submissions by outcome"
    );
    describe_counter!(
        names::COMMANDS_COMPLETED_TOTAL,
        "Total number of commands completed successfully"
    );
    describe_counter!(
        names::COMMANDS_FAILED_TOTAL,
        "Total number of commands that failed or panicked"
    );
    describe_counter!(
        names::COMMANDS_BACKOFF_TOTAL,
        "Total number of commands that backed off on a provider ban"
    );
    describe_counter!(
        names::COMMANDS_DISCARDED_TOTAL,
        "Total number of unreadable command records removed"
    );
    describe_counter!(
        names::COMMANDS_INLINE_TOTAL,
        "Total number of inline command executions"
    );

    describe_gauge!(
        names::COMMANDS_PENDING,
        "Current number of queued commands per lane"
    );
    describe_gauge!(
        names::LANE_PAUSED,
        "Whether the lane is paused (1) or not (0)"
    );

    describe_histogram!(
        names::COMMAND_DURATION_SECONDS,
        "Command execution duration in seconds"
    );

    describe_counter!(
        names::BANS_RAISED_TOTAL,
        "Total number of provider bans raised"
    );
}

/// Command metrics recorder.
#[derive(Clone)]
pub struct CommandMetrics;

impl CommandMetrics {
    /// Record a submission.
    pub fn command_enqueued(lane: &str, command_type: &str, outcome: &str) {
        counter!(
            names::COMMANDS_ENQUEUED_TOTAL,
            "lane" => lane.to_string(),
            "command_type" => command_type.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    /// Record a command completed.
    pub fn command_completed(lane: &str, command_type: &str, duration: Duration) {
        counter!(
            names::COMMANDS_COMPLETED_TOTAL,
            "lane" => lane.to_string(),
            "command_type" => command_type.to_string()
        )
        .increment(1);

        Self::duration(lane, command_type, "completed", duration);
    }

    /// Record a command failed.
    pub fn command_failed(lane: &str, command_type: &str, reason: &str, duration: Duration) {
        counter!(
            names::COMMANDS_FAILED_TOTAL,
            "lane" => lane.to_string(),
            "command_type" => command_type.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);

        Self::duration(lane, command_type, "failed", duration);
    }

    /// Record a command backing off.
    pub fn command_backoff(lane: &str, command_type: &str, resource: &str, duration: Duration) {
        counter!(
            names::COMMANDS_BACKOFF_TOTAL,
            "lane" => lane.to_string(),
            "command_type" => command_type.to_string(),
            "resource" => resource.to_string()
        )
        .increment(1);

        Self::duration(lane, command_type, "backoff", duration);
    }

    /// Record an unreadable record removed.
    pub fn command_discarded(lane: &str, reason: &str) {
        counter!(
            names::COMMANDS_DISCARDED_TOTAL,
            "lane" => lane.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    /// Record an inline execution.
    pub fn command_inline(command_type: &str, outcome: &str) {
        counter!(
            names::COMMANDS_INLINE_TOTAL,
            "command_type" => command_type.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    fn duration(lane: &str, command_type: &str, status: &'static str, duration: Duration) {
        histogram!(
            names::COMMAND_DURATION_SECONDS,
            "lane" => lane.to_string(),
            "command_type" => command_type.to_string(),
            "status" => status
        )
        .record(duration.as_secs_f64());
    }
}

/// Lane metrics recorder.
#[derive(Clone)]
pub struct LaneMetrics;

impl LaneMetrics {
    /// Update the pending gauge.
    pub fn update_pending(lane: &str, pending: u64) {
        gauge!(
            names::COMMANDS_PENDING,
            "lane" => lane.to_string()
        )
        .set(pending as f64);
    }

    /// Update the paused gauge.
    pub fn update_paused(lane: &str, paused: bool) {
        gauge!(
            names::LANE_PAUSED,
            "lane" => lane.to_string()
        )
        .set(if paused { 1.0 } else { 0.0 });
    }
}

/// Ban metrics recorder.
#[derive(Clone)]
pub struct BanMetrics;

impl BanMetrics {
    /// Record a ban raised.
    pub fn ban_raised(resource: &str) {
        counter!(
            names::BANS_RAISED_TOTAL,
            "resource" => resource.to_string()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // No recorder installed; registration must still be a no-op.
        register_metrics();
    }

    #[test]
    fn test_command_metrics() {
        CommandMetrics::command_enqueued("general", "test", "inserted");
        CommandMetrics::command_completed("general", "test", Duration::from_millis(5));
        CommandMetrics::command_failed("general", "test", "panic", Duration::from_millis(5));
        CommandMetrics::command_backoff("general", "test", "anidb_udp", Duration::from_millis(5));
        CommandMetrics::command_discarded("general", "unknown_command");
        LaneMetrics::update_pending("general", 3);
        LaneMetrics::update_paused("general", true);
        BanMetrics::ban_raised("anidb_udp");
    }
}
