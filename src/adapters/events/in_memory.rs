//! In-process event bus.
//!
//! Each publish runs every handler of the event's exact type in its own
//! task and waits for all of them. A handler that fails or panics is logged
//! and counted in the [`DispatchReport`]; the others still run and the
//! publish still returns.
//!
//! Subscriptions are either strong (the bus keeps the handler alive until
//! `unsubscribe`) or weak (forgotten once the owner drops the handler;
//! dead entries are pruned on the next publish of that type).

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

use crate::domain::foundation::{DomainError, EventEnvelope};
use crate::ports::{
    DispatchReport, EventHandler, EventPublisher, EventSubscriber, SubscriptionHandle,
};

enum HandlerRef {
    Strong(Arc<dyn EventHandler>),
    Weak(Weak<dyn EventHandler>),
}

impl HandlerRef {
    fn upgrade(&self) -> Option<Arc<dyn EventHandler>> {
        match self {
            HandlerRef::Strong(handler) => Some(handler.clone()),
            HandlerRef::Weak(handler) => handler.upgrade(),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            HandlerRef::Strong(_) => true,
            HandlerRef::Weak(handler) => handler.strong_count() > 0,
        }
    }
}

struct Subscription {
    handle: SubscriptionHandle,
    handler: HandlerRef,
}

/// Adapts a synchronous closure as an [`EventHandler`].
struct FnHandler<F> {
    name: &'static str,
    f: F,
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&EventEnvelope) -> Result<(), DomainError> + Send + Sync + 'static,
{
    async fn handle(&self, event: EventEnvelope) -> Result<(), DomainError> {
        (self.f)(&event)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// In-process event bus keyed by event type.
///
/// # Example
///
/// ```ignore
/// let bus = Arc::new(InMemoryEventBus::new());
/// let handle = bus.subscribe("chat.room_said", bridge.clone());
///
/// let report = bus.publish(envelope).await?;
///
/// bus.unsubscribe(&handle);
/// ```
pub struct InMemoryEventBus {
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    /// Present only when recording; see [`InMemoryEventBus::recording`].
    published: Option<RwLock<Vec<EventEnvelope>>>,
}

impl InMemoryEventBus {
    /// Creates a new empty event bus.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            published: None,
        }
    }

    /// A bus that also keeps every published event, for test assertions.
    pub fn recording() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            published: Some(RwLock::new(Vec::new())),
        }
    }

    /// Subscribes a synchronous closure.
    pub fn subscribe_fn<F>(&self, event_type: &str, name: &'static str, f: F) -> SubscriptionHandle
    where
        F: Fn(&EventEnvelope) -> Result<(), DomainError> + Send + Sync + 'static,
    {
        self.subscribe(event_type, Arc::new(FnHandler { name, f }))
    }

    fn insert(&self, event_type: &str, handler: HandlerRef) -> SubscriptionHandle {
        let handle = SubscriptionHandle::new(event_type);
        self.subscriptions
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(Subscription {
                handle: handle.clone(),
                handler,
            });
        debug!(event_type, subscription_id = %handle.id, "Event handler subscribed");
        handle
    }

    /// Live handlers for `event_type`, pruning dropped weak subscriptions.
    fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        let (handlers, stale) = {
            let subscriptions = self.subscriptions.read();
            let Some(entries) = subscriptions.get(event_type) else {
                return Vec::new();
            };
            let handlers: Vec<_> = entries.iter().filter_map(|s| s.handler.upgrade()).collect();
            let stale = handlers.len() < entries.len();
            (handlers, stale)
        };

        if stale {
            let mut subscriptions = self.subscriptions.write();
            if let Some(entries) = subscriptions.get_mut(event_type) {
                entries.retain(|s| s.handler.is_live());
                if entries.is_empty() {
                    subscriptions.remove(event_type);
                }
            }
        }
        handlers
    }

    // === Test Helpers ===

    /// Returns all published events. Empty unless the bus is recording.
    pub fn published_events(&self) -> Vec<EventEnvelope> {
        self.published
            .as_ref()
            .map(|published| published.read().clone())
            .unwrap_or_default()
    }

    /// Returns recorded events of a specific type.
    pub fn events_of_type(&self, event_type: &str) -> Vec<EventEnvelope> {
        self.published_events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Returns count of recorded events.
    pub fn event_count(&self) -> usize {
        self.published
            .as_ref()
            .map(|published| published.read().len())
            .unwrap_or(0)
    }

    /// Clears recorded events.
    pub fn clear(&self) {
        if let Some(published) = &self.published {
            published.write().clear();
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: EventEnvelope) -> Result<DispatchReport, DomainError> {
        if let Some(published) = &self.published {
            published.write().push(event.clone());
        }

        // Handlers are cloned out so no lock is held across the await.
        let handlers = self.handlers_for(&event.event_type);
        if handlers.is_empty() {
            return Ok(DispatchReport::default());
        }

        let tasks = handlers.iter().map(|handler| {
            let handler = handler.clone();
            let event = event.clone();
            tokio::spawn(async move { handler.handle(event).await })
        });
        let outcomes = join_all(tasks).await;

        let mut report = DispatchReport::default();
        for (handler, outcome) in handlers.iter().zip(outcomes) {
            match outcome {
                Ok(Ok(())) => report.handled += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        handler = handler.name(),
                        event_type = %event.event_type,
                        event_id = %event.event_id,
                        error = %e,
                        "Event handler failed"
                    );
                }
                Err(join_error) => {
                    report.failed += 1;
                    error!(
                        handler = handler.name(),
                        event_type = %event.event_type,
                        event_id = %event.event_id,
                        error = %join_error,
                        "Event handler panicked"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn publish_all(&self, events: Vec<EventEnvelope>) -> Result<DispatchReport, DomainError> {
        let mut report = DispatchReport::default();
        for event in events {
            report.merge(self.publish(event).await?);
        }
        Ok(report)
    }
}

impl EventSubscriber for InMemoryEventBus {
    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> SubscriptionHandle {
        self.insert(event_type, HandlerRef::Strong(handler))
    }

    fn subscribe_weak(
        &self,
        event_type: &str,
        handler: Weak<dyn EventHandler>,
    ) -> SubscriptionHandle {
        self.insert(event_type, HandlerRef::Weak(handler))
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let Some(entries) = subscriptions.get_mut(&handle.event_type) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|s| s.handle.id != handle.id);
        let removed = entries.len() < before;
        if entries.is_empty() {
            subscriptions.remove(&handle.event_type);
        }
        if removed {
            debug!(event_type = %handle.event_type, subscription_id = %handle.id, "Event handler unsubscribed");
        }
        removed
    }

    fn subscriber_counts(&self) -> HashMap<String, usize> {
        self.subscriptions
            .read()
            .iter()
            .map(|(event_type, entries)| {
                let live = entries.iter().filter(|s| s.handler.is_live()).count();
                (event_type.clone(), live)
            })
            .filter(|(_, live)| *live > 0)
            .collect()
    }
}
