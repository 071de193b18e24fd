//! Messages fanned out to live connections.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::foundation::{EventEnvelope, EventId, Timestamp};

/// A message delivered to every live connection of an identity.
///
/// The payload is opaque to the relay; transports serialize the whole
/// message as one JSON frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: EventId,
    pub event_type: String,
    pub payload: JsonValue,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl OutboundMessage {
    pub fn new(event_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            message_id: EventId::new(),
            event_type: event_type.into(),
            payload,
            created_at: Timestamp::now(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Serializes the message as a transport frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&EventEnvelope> for OutboundMessage {
    fn from(envelope: &EventEnvelope) -> Self {
        Self {
            message_id: envelope.event_id.clone(),
            event_type: envelope.event_type.clone(),
            payload: envelope.payload.clone(),
            created_at: envelope.occurred_at,
            correlation_id: envelope.metadata.correlation_id.clone(),
        }
    }
}
