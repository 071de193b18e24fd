//! Connection domain module.
//!
//! Value types for live transport connections, the messages fanned out to
//! them and the reports describing each fan-out.

mod connection;
mod errors;
mod message;
mod report;

pub use connection::{CloseReason, Connection, Liveness, TransportKind};
pub use errors::{CapacityLimit, ConnectionError};
pub use message::OutboundMessage;
pub use report::{AggregateDeliveryReport, DeliveryReport};
