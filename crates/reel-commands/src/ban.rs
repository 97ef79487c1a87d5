//! Provider ban tracking.
//!
//! Providers impose temporary bans (flood control, HTTP 503 storms, UDP
//! "banned" replies). The coordinator records them per resource so that
//! processors can pause dependent lanes and commands can fail fast instead of
//! making a doomed call.

use crate::metrics::BanMetrics;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Stand-in for bans whose estimate overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A ban raised against a provider resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanSignal {
    /// Banned resource.
    pub resource: String,
    /// When the ban was raised.
    pub raised_at: DateTime<Utc>,
    /// Estimated end of the ban. A lower bound, not a guarantee.
    pub resume_at: DateTime<Utc>,
    /// Estimated end on the runtime clock, used for waiting.
    pub(crate) resume_instant: Instant,
}

impl BanSignal {
    /// Creates a signal for a ban expected to last `duration`.
    pub fn new(resource: impl Into<String>, duration: Duration) -> Self {
        let raised_at = Utc::now();
        let resume_at = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| raised_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let now = Instant::now();
        Self {
            resource: resource.into(),
            raised_at,
            resume_at,
            resume_instant: now.checked_add(duration).unwrap_or(now + FAR_FUTURE),
        }
    }

    /// Creates a signal for a ban expected to end at `resume_at`.
    pub fn until(resource: impl Into<String>, resume_at: DateTime<Utc>) -> Self {
        let remaining = (resume_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let mut signal = Self::new(resource, remaining);
        signal.resume_at = resume_at;
        signal
    }

    /// Returns true while the estimate has not elapsed.
    pub fn is_active(&self) -> bool {
        Instant::now() < self.resume_instant
    }

    /// Time left until the estimate elapses.
    pub fn remaining(&self) -> Duration {
        self.resume_instant.saturating_duration_since(Instant::now())
    }
}

/// Tracks active bans and notifies waiters when they change.
pub struct BanCoordinator {
    bans: RwLock<HashMap<String, BanSignal>>,
    changes: watch::Sender<u64>,
}

impl BanCoordinator {
    /// Creates a coordinator with no active bans.
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            bans: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Record a ban on `resource` lasting at least `duration`.
    pub fn raise_ban(&self, resource: &str, duration: Duration) -> BanSignal {
        let signal = BanSignal::new(resource, duration);
        self.apply(signal.clone());
        signal
    }

    /// Record a ban on `resource` lasting until `resume_at`.
    pub fn raise_ban_until(&self, resource: &str, resume_at: DateTime<Utc>) -> BanSignal {
        let signal = BanSignal::until(resource, resume_at);
        self.apply(signal.clone());
        signal
    }

    /// Record a ban signal produced elsewhere, replacing any previous estimate.
    pub fn apply(&self, signal: BanSignal) {
        warn!(
            resource = %signal.resource,
            resume_at = %signal.resume_at,
            remaining_secs = signal.remaining().as_secs(),
            "Provider ban raised"
        );
        BanMetrics::ban_raised(&signal.resource);
        self.bans.write().insert(signal.resource.clone(), signal);
        self.notify();
    }

    /// Lift a ban before its estimate elapses.
    ///
    /// Returns true if a ban was recorded for the resource.
    pub fn clear_ban(&self, resource: &str) -> bool {
        let removed = self.bans.write().remove(resource).is_some();
        if removed {
            info!(resource = %resource, "Provider ban cleared");
            self.notify();
        }
        removed
    }

    /// Returns true if `resource` is currently banned.
    pub fn is_banned(&self, resource: &str) -> bool {
        self.active(resource).is_some()
    }

    /// Estimated end of the ban on `resource`, if one is active.
    pub fn resume_at(&self, resource: &str) -> Option<DateTime<Utc>> {
        self.active(resource).map(|signal| signal.resume_at)
    }

    /// Returns the active ban on `resource`.
    pub fn active(&self, resource: &str) -> Option<BanSignal> {
        self.bans
            .read()
            .get(resource)
            .filter(|signal| signal.is_active())
            .cloned()
    }

    /// Returns the latest-ending active ban among `resources`.
    pub fn blocking(&self, resources: &[String]) -> Option<BanSignal> {
        let bans = self.bans.read();
        resources
            .iter()
            .filter_map(|resource| bans.get(resource))
            .filter(|signal| signal.is_active())
            .max_by_key(|signal| signal.resume_instant)
            .cloned()
    }

    /// All currently active bans.
    pub fn active_bans(&self) -> Vec<BanSignal> {
        self.prune_expired();
        let mut bans: Vec<BanSignal> = self.bans.read().values().cloned().collect();
        bans.sort_by(|a, b| a.resource.cmp(&b.resource));
        bans
    }

    /// Subscribe to ban changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn prune_expired(&self) {
        let mut bans = self.bans.write();
        bans.retain(|resource, signal| {
            let keep = signal.is_active();
            if !keep {
                debug!(resource = %resource, "Provider ban expired");
            }
            keep
        });
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

impl Default for BanCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BanCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BanCoordinator")
            .field("bans", &self.bans.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ban_expires_after_estimate() {
        let bans = BanCoordinator::new();
        bans.raise_ban("anidb_udp", Duration::from_secs(5));
        assert!(bans.is_banned("anidb_udp"));
        assert!(!bans.is_banned("anidb_http"));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(bans.is_banned("anidb_udp"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!bans.is_banned("anidb_udp"));
        assert!(bans.resume_at("anidb_udp").is_none());
        assert!(bans.active_bans().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reraise_extends_ban() {
        let bans = BanCoordinator::new();
        bans.raise_ban("anidb_http", Duration::from_secs(2));
        tokio::time::advance(Duration::from_secs(1)).await;
        bans.raise_ban("anidb_http", Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(bans.is_banned("anidb_http"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reraise_replaces_longer_estimate() {
        let bans = BanCoordinator::new();
        bans.raise_ban("anidb_http", Duration::from_secs(600));
        bans.raise_ban("anidb_http", Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!bans.is_banned("anidb_http"));
    }

    #[tokio::test]
    async fn test_clear_ban_notifies() {
        let bans = BanCoordinator::new();
        let mut rx = bans.subscribe();
        rx.borrow_and_update();

        bans.raise_ban("anidb_udp", Duration::from_secs(600));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert!(bans.clear_ban("anidb_udp"));
        assert!(rx.has_changed().unwrap());
        assert!(!bans.is_banned("anidb_udp"));
        assert!(!bans.clear_ban("anidb_udp"));
    }

    #[tokio::test]
    async fn test_blocking_picks_latest_resume() {
        let bans = BanCoordinator::new();
        bans.raise_ban("anidb_udp", Duration::from_secs(60));
        bans.raise_ban("anidb_http", Duration::from_secs(600));

        let resources = vec!["anidb_udp".to_string(), "anidb_http".to_string()];
        let blocking = bans.blocking(&resources).unwrap();
        assert_eq!(blocking.resource, "anidb_http");

        assert!(bans.blocking(&["tvdb".to_string()]).is_none());
        assert!(bans.blocking(&[]).is_none());
    }

    #[tokio::test]
    async fn test_raise_until_past_is_inactive() {
        let bans = BanCoordinator::new();
        let signal = bans.raise_ban_until("anidb_udp", Utc::now() - chrono::Duration::seconds(5));
        assert!(!signal.is_active());
        assert!(!bans.is_banned("anidb_udp"));
    }
}
