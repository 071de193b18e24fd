//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid bind host: {0}")]
    InvalidHost(String),

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("max_per_identity exceeds max_connections")]
    PerIdentityExceedsTotal,

    #[error("Retry base delay exceeds max delay")]
    RetryDelaysInverted,

    #[error("Retry jitter ratio must be within 0.0..=0.25")]
    InvalidJitterRatio,

    #[error("Circuit breaker cooldown multiplier must be at least 1.0")]
    InvalidCooldownMultiplier,

    #[error("Circuit breaker max cooldown is shorter than cooldown")]
    CooldownCeilingTooLow,

    #[error("Subscription wildcard limit must be at least 1")]
    InvalidWildcardLimit,
}
