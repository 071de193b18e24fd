//! Event bus adapters.
//!
//! - `InMemoryEventBus` - In-process bus with per-handler isolation
//! - `BrokerBridge` - Event handler republishing routed events on the broker

mod broker_bridge;
mod in_memory;

pub use broker_bridge::{BrokerBridge, DEFAULT_ROUTES};
pub use in_memory::InMemoryEventBus;
