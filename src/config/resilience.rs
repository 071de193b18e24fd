//! Circuit breaker and retry configuration

use serde::Deserialize;
use std::time::Duration;

use crate::adapters::resilience::{RetryPolicy, MAX_JITTER_RATIO};
use crate::ports::CircuitBreakerConfig;

use super::error::ValidationError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub retry: RetrySettings,
}

impl ResilienceConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.circuit_breaker.validate()?;
        self.retry.validate()
    }
}

/// Circuit breaker thresholds (K, W, T) applied to every guarded operation
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_failure_window")]
    pub failure_window_secs: u64,

    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    #[serde(default = "default_cooldown_multiplier")]
    pub cooldown_multiplier: f64,

    #[serde(default = "default_max_cooldown")]
    pub max_cooldown_secs: u64,
}

impl CircuitBreakerSettings {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            failure_window: Duration::from_secs(self.failure_window_secs),
            cooldown: Duration::from_millis(self.cooldown_ms),
            cooldown_multiplier: self.cooldown_multiplier,
            max_cooldown: Duration::from_secs(self.max_cooldown_secs),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::MustBePositive("circuit_breaker.failure_threshold"));
        }
        if self.failure_window_secs == 0 {
            return Err(ValidationError::MustBePositive("circuit_breaker.failure_window_secs"));
        }
        if self.cooldown_ms == 0 {
            return Err(ValidationError::MustBePositive("circuit_breaker.cooldown_ms"));
        }
        if self.cooldown_multiplier.is_nan() || self.cooldown_multiplier < 1.0 {
            return Err(ValidationError::InvalidCooldownMultiplier);
        }
        if Duration::from_secs(self.max_cooldown_secs) < Duration::from_millis(self.cooldown_ms) {
            return Err(ValidationError::CooldownCeilingTooLow);
        }
        Ok(())
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window(),
            cooldown_ms: default_cooldown_ms(),
            cooldown_multiplier: default_cooldown_multiplier(),
            max_cooldown_secs: default_max_cooldown(),
        }
    }
}

/// Backoff for broker operations
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_ratio: self.jitter_ratio,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::MustBePositive("retry.max_attempts"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ValidationError::RetryDelaysInverted);
        }
        if !(0.0..=MAX_JITTER_RATIO).contains(&self.jitter_ratio) {
            return Err(ValidationError::InvalidJitterRatio);
        }
        Ok(())
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_failure_window() -> u64 {
    30
}

fn default_cooldown_ms() -> u64 {
    10_000
}

fn default_cooldown_multiplier() -> f64 {
    2.0
}

fn default_max_cooldown() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter_ratio() -> f64 {
    0.1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_component_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.circuit_breaker.breaker_config(), CircuitBreakerConfig::default());
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_jitter_rejected() {
        let retry = RetrySettings {
            jitter_ratio: 1.5,
            ..Default::default()
        };
        assert_eq!(retry.validate(), Err(ValidationError::InvalidJitterRatio));
    }

    #[test]
    fn test_jitter_wide_enough_to_reorder_delays_rejected() {
        let retry = RetrySettings {
            jitter_ratio: 0.5,
            ..Default::default()
        };
        assert_eq!(retry.validate(), Err(ValidationError::InvalidJitterRatio));

        let retry = RetrySettings {
            jitter_ratio: MAX_JITTER_RATIO,
            ..Default::default()
        };
        assert!(retry.validate().is_ok());
    }

    #[test]
    fn test_inverted_delays_rejected() {
        let retry = RetrySettings {
            base_delay_ms: 5_000,
            max_delay_ms: 100,
            ..Default::default()
        };
        assert_eq!(retry.validate(), Err(ValidationError::RetryDelaysInverted));
    }

    #[test]
    fn test_shrinking_cooldown_rejected() {
        let breaker = CircuitBreakerSettings {
            cooldown_multiplier: 0.5,
            ..Default::default()
        };
        assert_eq!(breaker.validate(), Err(ValidationError::InvalidCooldownMultiplier));
    }
}
