//! EventSubscriber port - Interface for subscribing to game events.
//!
//! Every subscription returns a [`SubscriptionHandle`]. Owners keep the
//! handle and pass it to `unsubscribe` when they shut down; subscriptions
//! are never revoked implicitly, except for weak subscriptions whose handler
//! has been dropped.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::domain::foundation::{DomainError, EventEnvelope, SubscriptionId};

/// Handler for processing game events.
///
/// Implementations should be:
/// - **Quick** - Long operations should be queued for async processing
/// - **Isolated** - Errors don't affect other handlers
///
/// # Example
///
/// ```ignore
/// struct ScoreboardUpdater { /* ... */ }
///
/// #[async_trait]
/// impl EventHandler for ScoreboardUpdater {
///     async fn handle(&self, event: EventEnvelope) -> Result<(), DomainError> {
///         let payload: PlayerScored = event.payload_as()?;
///         // Update scoreboard...
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "ScoreboardUpdater"
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process an event.
    async fn handle(&self, event: EventEnvelope) -> Result<(), DomainError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}

/// Proof of a subscription, required to remove it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub event_type: String,
}

impl SubscriptionHandle {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            id: SubscriptionId::new(),
            event_type: event_type.into(),
        }
    }
}

/// Port for subscribing to game events.
///
/// # Example
///
/// ```ignore
/// let handle = subscriber.subscribe("chat.room_said", bridge.clone());
/// // ... on shutdown:
/// subscriber.unsubscribe(&handle);
/// ```
pub trait EventSubscriber: Send + Sync {
    /// Subscribe handler to a specific event type.
    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> SubscriptionHandle;

    /// Subscribe handler to multiple event types.
    fn subscribe_all(
        &self,
        event_types: &[&str],
        handler: Arc<dyn EventHandler>,
    ) -> Vec<SubscriptionHandle> {
        event_types
            .iter()
            .map(|event_type| self.subscribe(event_type, handler.clone()))
            .collect()
    }

    /// Subscribe without keeping the handler alive. Once the owner drops the
    /// handler, the subscription is forgotten.
    fn subscribe_weak(&self, event_type: &str, handler: Weak<dyn EventHandler>)
        -> SubscriptionHandle;

    /// Remove a subscription. Returns `false` if it was already gone.
    fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool;

    /// Live subscriber count per event type.
    fn subscriber_counts(&self) -> HashMap<String, usize>;
}

/// Combined trait for event bus implementations.
///
/// An EventBus provides both publishing and subscribing capabilities.
pub trait EventBus: super::EventPublisher + EventSubscriber {}

// Blanket implementation - any type that implements both traits is an EventBus
impl<T: super::EventPublisher + EventSubscriber> EventBus for T {}
