//! Connection manager configuration

use serde::Deserialize;
use std::time::Duration;

use crate::application::connections::ConnectionManagerConfig;

use super::error::ValidationError;

/// Connection limits, timeouts and health sweep settings
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionsConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_max_per_identity")]
    pub max_per_identity: usize,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Seconds between health sweeps
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    /// Consecutive failed probes (N) before a connection is dead
    #[serde(default = "default_failed_probe_threshold")]
    pub failed_probe_threshold: u32,

    /// Push connections silent for this long are dead
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Outbound frames buffered per connection
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,

    #[serde(default = "default_closed_log_capacity")]
    pub closed_log_capacity: usize,

    #[serde(default = "default_closed_log_ttl")]
    pub closed_log_ttl_secs: u64,
}

impl ConnectionsConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig {
            max_connections: self.max_connections,
            max_per_identity: self.max_per_identity,
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            failed_probe_threshold: self.failed_probe_threshold,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            closed_log_capacity: self.closed_log_capacity,
            closed_log_ttl: Duration::from_secs(self.closed_log_ttl_secs),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let positive = [
            ("connections.max_connections", self.max_connections as u64),
            ("connections.max_per_identity", self.max_per_identity as u64),
            ("connections.send_timeout_ms", self.send_timeout_ms),
            ("connections.probe_timeout_ms", self.probe_timeout_ms),
            ("connections.health_interval_secs", self.health_interval_secs),
            ("connections.failed_probe_threshold", self.failed_probe_threshold as u64),
            ("connections.idle_timeout_secs", self.idle_timeout_secs),
            ("connections.sink_capacity", self.sink_capacity as u64),
            ("connections.closed_log_capacity", self.closed_log_capacity as u64),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ValidationError::MustBePositive(field));
        }
        if self.max_per_identity > self.max_connections {
            return Err(ValidationError::PerIdentityExceedsTotal);
        }
        Ok(())
    }
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_per_identity: default_max_per_identity(),
            send_timeout_ms: default_send_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            health_interval_secs: default_health_interval(),
            failed_probe_threshold: default_failed_probe_threshold(),
            idle_timeout_secs: default_idle_timeout(),
            sink_capacity: default_sink_capacity(),
            closed_log_capacity: default_closed_log_capacity(),
            closed_log_ttl_secs: default_closed_log_ttl(),
        }
    }
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_per_identity() -> usize {
    8
}

fn default_send_timeout_ms() -> u64 {
    5_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_health_interval() -> u64 {
    15
}

fn default_failed_probe_threshold() -> u32 {
    3
}

fn default_idle_timeout() -> u64 {
    120
}

fn default_sink_capacity() -> usize {
    256
}

fn default_closed_log_capacity() -> usize {
    1024
}

fn default_closed_log_ttl() -> u64 {
    300
}
