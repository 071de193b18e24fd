//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers and error types that form the
//! vocabulary of the relay.

mod errors;
mod events;
mod ids;
mod timestamp;

pub use errors::{DomainError, ErrorCode, ValidationError};
pub use events::{EventEnvelope, EventId, EventMetadata, GameEvent};
pub use ids::{ConnectionId, DeadLetterId, IdentityId, SessionId, SubscriptionId, MAX_EXTERNAL_ID_LEN};
pub use timestamp::Timestamp;
