//! EventPublisher port - Interface for publishing in-process game events.
//!
//! Game-rule code publishes through this port without knowing which
//! handlers (broker bridge, metrics, other game systems) are listening.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::foundation::{DomainError, EventEnvelope};

/// Result of dispatching one event to its handlers.
///
/// Handler failures are isolated and counted here; they never turn the
/// publish itself into an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Handlers that completed successfully.
    pub handled: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.handled + self.failed
    }

    pub fn merge(&mut self, other: DispatchReport) {
        self.handled += other.handled;
        self.failed += other.failed;
    }
}

/// Port for publishing game events.
///
/// # Example
///
/// ```ignore
/// let event = EventEnvelope::from_event(&RoomSaid { room_id, text })?;
/// let report = publisher.publish(event).await?;
/// ```
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event to every handler of its exact type.
    ///
    /// Returns once every handler has finished.
    async fn publish(&self, event: EventEnvelope) -> Result<DispatchReport, DomainError>;

    /// Publish multiple events in order.
    async fn publish_all(&self, events: Vec<EventEnvelope>) -> Result<DispatchReport, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that trait is object-safe
    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn EventPublisher) {}

    #[test]
    fn dispatch_reports_merge() {
        let mut report = DispatchReport { handled: 2, failed: 0 };
        report.merge(DispatchReport { handled: 1, failed: 1 });
        assert_eq!(report, DispatchReport { handled: 3, failed: 1 });
        assert_eq!(report.total(), 4);
    }
}
