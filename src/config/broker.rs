//! Broker client configuration

use serde::Deserialize;
use std::time::Duration;

use crate::adapters::broker::BrokerClientConfig;
use crate::domain::subject::DEFAULT_MAX_WILDCARDS;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Bound on waiting for a subscription acknowledgement
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,

    /// Messages buffered per subscription before new ones are dropped
    #[serde(default = "default_handler_queue_capacity")]
    pub handler_queue_capacity: usize,

    /// Wildcard segments allowed in a subscription pattern
    #[serde(default = "default_max_wildcards")]
    pub max_wildcards: usize,
}

impl BrokerConfig {
    pub fn client_config(&self) -> BrokerClientConfig {
        BrokerClientConfig {
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
            subscribe_timeout: Duration::from_millis(self.subscribe_timeout_ms),
            handler_queue_capacity: self.handler_queue_capacity,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.publish_timeout_ms == 0 {
            return Err(ValidationError::MustBePositive("broker.publish_timeout_ms"));
        }
        if self.subscribe_timeout_ms == 0 {
            return Err(ValidationError::MustBePositive("broker.subscribe_timeout_ms"));
        }
        if self.handler_queue_capacity == 0 {
            return Err(ValidationError::MustBePositive("broker.handler_queue_capacity"));
        }
        if self.max_wildcards == 0 {
            return Err(ValidationError::InvalidWildcardLimit);
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            publish_timeout_ms: default_publish_timeout_ms(),
            subscribe_timeout_ms: default_subscribe_timeout_ms(),
            handler_queue_capacity: default_handler_queue_capacity(),
            max_wildcards: default_max_wildcards(),
        }
    }
}

fn default_publish_timeout_ms() -> u64 {
    2_000
}

fn default_subscribe_timeout_ms() -> u64 {
    5_000
}

fn default_handler_queue_capacity() -> usize {
    256
}

fn default_max_wildcards() -> usize {
    DEFAULT_MAX_WILDCARDS
}
