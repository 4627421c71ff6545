//! Signaling server configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; nothing is required, so a bare `signaling-server` starts a
//! working relay on the default port.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default attempt bound for collision-checked room-code generation.
pub const DEFAULT_ROOM_CODE_ATTEMPTS: u32 = 16;

/// Heartbeat interval clients are expected to honor, in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 15;

/// Default liveness timeout in seconds (three missed heartbeats).
pub const DEFAULT_LIVENESS_TIMEOUT_SECONDS: u64 = 45;

/// Default disconnect grace period in seconds.
pub const DEFAULT_DISCONNECT_GRACE_SECONDS: u64 = 60;

/// Default empty-room expiry in seconds.
pub const DEFAULT_EMPTY_ROOM_TIMEOUT_SECONDS: u64 = 60;

/// Default liveness sweep cadence in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 5;

/// Signaling server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Attempt bound for room-code generation before the request fails
    /// with `CapacityExhausted`.
    pub room_code_attempts: u32,

    /// Heartbeat interval clients are expected to emit at (advisory;
    /// the server only enforces the liveness timeout below).
    pub heartbeat_interval_seconds: u64,

    /// Seconds of silence after which an active participant is evicted
    /// exactly as an explicit leave.
    pub liveness_timeout_seconds: u64,

    /// Seconds a disconnected participant is retained for rejoin before
    /// being permanently removed.
    pub disconnect_grace_seconds: u64,

    /// Seconds an empty room is retained before being torn down.
    pub empty_room_timeout_seconds: u64,

    /// Cadence of the per-room liveness sweep.
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            room_code_attempts: DEFAULT_ROOM_CODE_ATTEMPTS,
            heartbeat_interval_seconds: DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
            liveness_timeout_seconds: DEFAULT_LIVENESS_TIMEOUT_SECONDS,
            disconnect_grace_seconds: DEFAULT_DISCONNECT_GRACE_SECONDS,
            empty_room_timeout_seconds: DEFAULT_EMPTY_ROOM_TIMEOUT_SECONDS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is present but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is present but unparseable.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_address = vars
            .get("PARLEY_BIND_ADDRESS")
            .cloned()
            .unwrap_or(defaults.bind_address);

        Ok(Self {
            bind_address,
            room_code_attempts: parse_var(
                vars,
                "PARLEY_ROOM_CODE_ATTEMPTS",
                defaults.room_code_attempts,
            )?,
            heartbeat_interval_seconds: parse_var(
                vars,
                "PARLEY_HEARTBEAT_INTERVAL_SECONDS",
                defaults.heartbeat_interval_seconds,
            )?,
            liveness_timeout_seconds: parse_var(
                vars,
                "PARLEY_LIVENESS_TIMEOUT_SECONDS",
                defaults.liveness_timeout_seconds,
            )?,
            disconnect_grace_seconds: parse_var(
                vars,
                "PARLEY_DISCONNECT_GRACE_SECONDS",
                defaults.disconnect_grace_seconds,
            )?,
            empty_room_timeout_seconds: parse_var(
                vars,
                "PARLEY_EMPTY_ROOM_TIMEOUT_SECONDS",
                defaults.empty_room_timeout_seconds,
            )?,
            sweep_interval_seconds: parse_var(
                vars,
                "PARLEY_SWEEP_INTERVAL_SECONDS",
                defaults.sweep_interval_seconds,
            )?,
        })
    }

    /// Disconnect grace period as a [`Duration`].
    #[must_use]
    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_seconds)
    }

    /// Liveness timeout as a [`Duration`].
    #[must_use]
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_seconds)
    }
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}
