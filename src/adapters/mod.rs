//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the relay core to external systems:
//! - `broker` - Broker client, pub/sub transports, delivery relay
//! - `channels` - WebSocket and SSE connection endpoints
//! - `dead_letter` - Dead letter stores (memory, file)
//! - `events` - In-process event bus and broker bridge
//! - `resilience` - Circuit breakers and retry

pub mod broker;
pub mod channels;
pub mod dead_letter;
pub mod events;
pub mod resilience;

pub use broker::{BrokerClient, DeliveryRelay, InMemoryTransport, RedisTransport};
pub use events::{BrokerBridge, InMemoryEventBus};
