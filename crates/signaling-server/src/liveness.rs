//! Liveness timeout policy.
//!
//! The timeout decisions live here as pure functions over instants so the
//! policy is testable without actors or sockets. Each room actor applies
//! the policy on a fixed sweep interval:
//!
//! - an Active participant whose `last_seen` is older than the liveness
//!   timeout is evicted exactly as an explicit leave;
//! - a Disconnected participant whose grace period has elapsed is
//!   permanently removed;
//! - an empty room past the empty-room timeout tears itself down.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::Config;

/// Timeout policy applied by each room's periodic sweep.
#[derive(Debug, Clone, Copy)]
pub struct LivenessPolicy {
    /// Silence threshold after which an active participant is presumed dead.
    pub liveness_timeout: Duration,
    /// Retention window for disconnected participants awaiting rejoin.
    pub disconnect_grace: Duration,
    /// Retention window for rooms with no participants.
    pub empty_room_timeout: Duration,
    /// Cadence of the sweep itself.
    pub sweep_interval: Duration,
}

impl LivenessPolicy {
    /// Build the policy from service configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            liveness_timeout: Duration::from_secs(config.liveness_timeout_seconds),
            disconnect_grace: Duration::from_secs(config.disconnect_grace_seconds),
            empty_room_timeout: Duration::from_secs(config.empty_room_timeout_seconds),
            sweep_interval: Duration::from_secs(config.sweep_interval_seconds),
        }
    }

    /// Whether an active participant has gone silent past the liveness
    /// timeout.
    #[must_use]
    pub fn is_stale(&self, last_seen: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_seen) >= self.liveness_timeout
    }

    /// Whether a disconnected participant's grace period has elapsed.
    #[must_use]
    pub fn grace_expired(&self, disconnected_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(disconnected_at) >= self.disconnect_grace
    }

    /// Whether an empty room has outlived its retention window.
    #[must_use]
    pub fn empty_room_expired(&self, emptied_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(emptied_at) >= self.empty_room_timeout
    }
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
