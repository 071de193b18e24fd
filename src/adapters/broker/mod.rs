//! Broker adapters.
//!
//! - `BrokerClient` - Validated, resilient publish/subscribe
//! - `InMemoryTransport` - In-process pub/sub for single instances and tests
//! - `RedisTransport` - Redis PUBLISH / PSUBSCRIBE between relay instances
//! - `DeliveryRelay` - Subscription handler feeding the connection manager

mod client;
mod errors;
mod in_memory_transport;
mod redis_transport;
mod relay;

pub use client::{
    BrokerClient, BrokerClientConfig, BrokerStats, PublishOutcome, SubscriptionStats,
    PUBLISH_OPERATION, SUBSCRIBE_OPERATION,
};
pub use errors::BrokerError;
pub use in_memory_transport::{InMemoryTransport, DEFAULT_TRANSPORT_BUFFER};
pub use redis_transport::RedisTransport;
pub use relay::DeliveryRelay;
