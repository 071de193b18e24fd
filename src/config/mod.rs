//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `GAME_RELAY` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use game_relay::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Relay listening on {:?}", config.server.socket_addr());
//! ```

mod broker;
mod connections;
mod dead_letter;
mod error;
mod logging;
mod redis;
mod resilience;
mod server;
mod shutdown;

pub use broker::BrokerConfig;
pub use connections::ConnectionsConfig;
pub use dead_letter::{DeadLetterBackend, DeadLetterConfig};
pub use error::{ConfigError, ValidationError};
pub use logging::{LogFormat, LoggingConfig};
pub use redis::RedisConfig;
pub use resilience::{CircuitBreakerSettings, ResilienceConfig, RetrySettings};
pub use server::{Environment, ServerConfig};
pub use shutdown::ShutdownConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Every section has defaults, so an empty environment yields a working
/// single-instance relay. Load using [`AppConfig::load()`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// Log filter and format
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Redis broker; absent means the in-process transport
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// Connection limits and health sweep
    #[serde(default)]
    pub connections: ConnectionsConfig,

    /// Circuit breaker and retry
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Broker client timeouts and queues
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Dead letter storage and expiry
    #[serde(default)]
    pub dead_letter: DeadLetterConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `GAME_RELAY` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `GAME_RELAY__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `GAME_RELAY__CONNECTIONS__MAX_PER_IDENTITY=8` -> `connections.max_per_identity = 8`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("GAME_RELAY")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for the first invalid value found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        if let Some(redis) = &self.redis {
            redis.validate()?;
        }
        self.connections.validate()?;
        self.resilience.validate()?;
        self.broker.validate()?;
        self.dead_letter.validate()?;
        self.shutdown.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
