//! Shutdown configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// How long background tasks and broker workers get to stop
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.grace_period_secs == 0 {
            return Err(ValidationError::MustBePositive("shutdown.grace_period_secs"));
        }
        Ok(())
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period(),
        }
    }
}

fn default_grace_period() -> u64 {
    10
}
