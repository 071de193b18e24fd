//! BrokerBridge - Republishes in-process events on the broker.
//!
//! Each route maps an event type to a subject pattern and names the payload
//! fields that fill the pattern's parameters:
//!
//! ```text
//! chat.room_said { room_id: "library", .. }
//!        │ route: room_say, room_id <- payload.room_id
//!        ▼
//! chat.say.room.library
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapters::broker::{BrokerClient, PublishOutcome};
use crate::domain::foundation::{DomainError, EventEnvelope};
use crate::ports::{EventHandler, EventSubscriber, SubscriptionHandle};

/// Routes for the default subject patterns:
/// (event type, pattern name, [(pattern param, payload field)]).
pub const DEFAULT_ROUTES: &[(&str, &str, &[(&str, &str)])] = &[
    ("chat.room_said", "room_say", &[("room_id", "room_id")]),
    ("player.messaged", "player_direct", &[("identity", "identity")]),
    (
        "room.event",
        "room_event",
        &[("room_id", "room_id"), ("event", "event")],
    ),
    ("zone.broadcast", "zone_broadcast", &[("zone_id", "zone_id")]),
    ("system.announced", "system_announce", &[("scope", "scope")]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Route {
    pattern: String,
    /// (pattern parameter, payload field)
    params: Vec<(String, String)>,
}

/// Event handler that publishes routed events through the broker client.
pub struct BrokerBridge {
    broker: Arc<BrokerClient>,
    routes: HashMap<String, Route>,
}

impl BrokerBridge {
    pub fn new(broker: Arc<BrokerClient>) -> Self {
        Self {
            broker,
            routes: HashMap::new(),
        }
    }

    /// A bridge with [`DEFAULT_ROUTES`].
    pub fn with_default_routes(broker: Arc<BrokerClient>) -> Self {
        DEFAULT_ROUTES
            .iter()
            .fold(Self::new(broker), |bridge, (event_type, pattern, params)| {
                bridge.route(event_type, pattern, params)
            })
    }

    /// Adds or replaces the route for `event_type`.
    pub fn route(mut self, event_type: &str, pattern: &str, params: &[(&str, &str)]) -> Self {
        self.routes.insert(
            event_type.to_string(),
            Route {
                pattern: pattern.to_string(),
                params: params
                    .iter()
                    .map(|(param, field)| (param.to_string(), field.to_string()))
                    .collect(),
            },
        );
        self
    }

    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Subscribes the bridge to every routed event type.
    pub fn register(self: &Arc<Self>, subscriber: &dyn EventSubscriber) -> Vec<SubscriptionHandle> {
        self.event_types()
            .into_iter()
            .map(|event_type| subscriber.subscribe(event_type, self.clone()))
            .collect()
    }

    fn params_for(
        &self,
        route: &Route,
        event: &EventEnvelope,
    ) -> Result<Vec<(String, String)>, DomainError> {
        route
            .params
            .iter()
            .map(|(param, field)| {
                event
                    .payload_field(field)
                    .map(|value| (param.clone(), value))
                    .ok_or_else(|| {
                        DomainError::validation(
                            field.clone(),
                            format!("{} payload has no '{}' field", event.event_type, field),
                        )
                    })
            })
            .collect()
    }
}

#[async_trait]
impl EventHandler for BrokerBridge {
    async fn handle(&self, event: EventEnvelope) -> Result<(), DomainError> {
        let Some(route) = self.routes.get(&event.event_type) else {
            return Ok(());
        };

        let params = self.params_for(route, &event)?;
        let params: Vec<(&str, &str)> = params
            .iter()
            .map(|(param, value)| (param.as_str(), value.as_str()))
            .collect();

        match self
            .broker
            .publish_pattern(&route.pattern, &params, &event)
            .await?
        {
            PublishOutcome::Published { attempts } => {
                debug!(event_type = %event.event_type, pattern = %route.pattern, attempts, "Event bridged to broker");
            }
            PublishOutcome::DeadLettered { id, attempts } => {
                warn!(
                    event_type = %event.event_type,
                    pattern = %route.pattern,
                    dead_letter_id = %id,
                    attempts,
                    "Bridged event was dead-lettered"
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "BrokerBridge"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::broker::{BrokerClientConfig, InMemoryTransport};
    use crate::adapters::events::InMemoryEventBus;
    use crate::adapters::resilience::{CircuitBreakerRegistry, RetryHandler, RetryPolicy};
    use crate::domain::foundation::ErrorCode;
    use crate::domain::subject::SubjectRegistry;
    use crate::ports::{BrokerMessage, EventPublisher, MessageHandler};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<BrokerMessage>);

    #[async_trait]
    impl MessageHandler for Forward {
        async fn handle(&self, message: BrokerMessage) -> Result<(), DomainError> {
            let _ = self.0.send(message);
            Ok(())
        }
        fn name(&self) -> &'static str {
            "Forward"
        }
    }

    fn broker() -> (Arc<BrokerClient>, Arc<InMemoryTransport>) {
        let transport = Arc::new(InMemoryTransport::new());
        let client = BrokerClient::new(
            transport.clone(),
            Arc::new(SubjectRegistry::with_default_patterns()),
            Arc::new(CircuitBreakerRegistry::default()),
            Arc::new(RetryHandler::new(RetryPolicy::default())),
            BrokerClientConfig::default(),
        );
        (Arc::new(client), transport)
    }

    #[tokio::test]
    async fn routed_events_reach_the_broker() {
        let (broker, _) = broker();
        let (tx, mut rx) = mpsc::unbounded_channel();
        broker.subscribe("chat.say.room.*", Arc::new(Forward(tx))).await.unwrap();

        let bus = InMemoryEventBus::new();
        let bridge = Arc::new(BrokerBridge::with_default_routes(broker));
        let handles = bridge.register(&bus);
        assert_eq!(handles.len(), DEFAULT_ROUTES.len());

        let event = EventEnvelope::new(
            "chat.room_said",
            json!({"room_id": "library", "text": "hello"}),
        );
        let report = bus.publish(event.clone()).await.unwrap();
        assert_eq!(report.handled, 1);

        let message = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.subject.as_str(), "chat.say.room.library");
        assert_eq!(message.message_id, event.event_id);
    }

    #[tokio::test]
    async fn missing_payload_field_fails_the_handler() {
        let (broker, transport) = broker();
        let bridge = BrokerBridge::with_default_routes(broker);

        let err = bridge
            .handle(EventEnvelope::new("zone.broadcast", json!({"text": "hi"})))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(transport.publish_attempts(), 0);
    }

    #[tokio::test]
    async fn invalid_parameter_value_is_rejected() {
        let (broker, transport) = broker();
        let bridge = BrokerBridge::with_default_routes(broker);

        let err = bridge
            .handle(EventEnvelope::new("chat.room_said", json!({"room_id": "a.b"})))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(transport.publish_attempts(), 0);
    }

    #[tokio::test]
    async fn unrouted_events_are_ignored() {
        let (broker, transport) = broker();
        let bridge = BrokerBridge::new(broker).route("combat.hit", "room_say", &[("room_id", "room")]);

        bridge
            .handle(EventEnvelope::new("combat.miss", json!({})))
            .await
            .unwrap();
        assert_eq!(transport.publish_attempts(), 0);
        assert_eq!(bridge.event_types(), vec!["combat.hit"]);
    }
}
