//! MessageHandler port - Callback for broker subscriptions.
//!
//! Also defines [`BrokerMessage`], the envelope every relay instance puts on
//! the wire.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::foundation::{
    DomainError, EventEnvelope, EventId, EventMetadata, IdentityId, Timestamp,
};
use crate::domain::subject::Subject;

/// Wire envelope for relayed messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub message_id: EventId,
    pub subject: Subject,
    pub event_type: String,

    /// Identities the receiving instance should deliver to.
    #[serde(default)]
    pub targets: Vec<IdentityId>,

    pub payload: JsonValue,
    pub published_at: Timestamp,

    #[serde(default)]
    pub metadata: EventMetadata,
}

impl BrokerMessage {
    pub fn new(subject: Subject, event_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            message_id: EventId::new(),
            subject,
            event_type: event_type.into(),
            targets: Vec::new(),
            payload,
            published_at: Timestamp::now(),
            metadata: EventMetadata::default(),
        }
    }

    /// Wraps an in-process event for the given subject, keeping its id,
    /// recipients and tracing metadata.
    pub fn from_envelope(subject: Subject, envelope: &EventEnvelope) -> Self {
        Self {
            message_id: envelope.event_id.clone(),
            subject,
            event_type: envelope.event_type.clone(),
            targets: envelope.targets.clone(),
            payload: envelope.payload.clone(),
            published_at: Timestamp::now(),
            metadata: envelope.metadata.clone(),
        }
    }

    pub fn with_targets(mut self, targets: impl IntoIterator<Item = IdentityId>) -> Self {
        self.targets = targets.into_iter().collect();
        self
    }
}

/// Handler invoked for messages arriving on a broker subscription.
///
/// Each subscription runs its handler on its own worker, so a slow handler
/// only delays its own subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: BrokerMessage) -> Result<(), DomainError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn MessageHandler) {}

    #[test]
    fn from_envelope_keeps_identity_and_metadata() {
        let envelope = EventEnvelope::new("chat.room_said", json!({"text": "hello"}))
            .with_targets([IdentityId::new("p1").unwrap()])
            .with_correlation_id("cmd-1");
        let subject = Subject::parse("chat.say.room.library").unwrap();

        let message = BrokerMessage::from_envelope(subject.clone(), &envelope);

        assert_eq!(message.message_id, envelope.event_id);
        assert_eq!(message.subject, subject);
        assert_eq!(message.targets.len(), 1);
        assert_eq!(message.metadata.correlation_id.as_deref(), Some("cmd-1"));
    }

    #[test]
    fn wire_format_uses_snake_case_fields() {
        let message = BrokerMessage::new(
            Subject::parse("system.announce.global").unwrap(),
            "system.announced",
            json!({"text": "restart in 5"}),
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["subject"], "system.announce.global");
        assert_eq!(value["event_type"], "system.announced");
        assert!(value.get("published_at").is_some());
    }
}
