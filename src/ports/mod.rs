//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the relay core and the outside world. Adapters implement these ports.
//! Every call that touches a socket, the broker or storage is async.
//!
//! ## Event Ports
//!
//! - `EventPublisher` - Publishing in-process game events
//! - `EventSubscriber` - Subscribing with explicit handles
//! - `EventHandler` - Handler that processes incoming events
//!
//! ## Transport Ports
//!
//! - `ConnectionSink` - One live push or stream channel to a client
//! - `PubSubTransport` - The broker wire between relay instances
//! - `MessageHandler` - Callback for broker subscriptions
//!
//! ## Resilience Ports
//!
//! - `CircuitBreaker` - Fail-fast guard per broker operation
//! - `DeadLetterStore` - Storage for messages that exhausted retries

mod circuit_breaker;
mod connection_sink;
mod dead_letter_store;
mod event_publisher;
mod event_subscriber;
mod message_handler;
mod pubsub_transport;

pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
};
pub use connection_sink::{ConnectionSink, SinkError};
pub use dead_letter_store::{DeadLetterError, DeadLetterStore};
pub use event_publisher::{DispatchReport, EventPublisher};
pub use event_subscriber::{EventBus, EventHandler, EventSubscriber, SubscriptionHandle};
pub use message_handler::{BrokerMessage, MessageHandler};
pub use pubsub_transport::{InboundMessage, InboundStream, PubSubTransport, TransportError};
