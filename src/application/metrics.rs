//! RelayMetrics - Pollable health/metrics surface.
//!
//! A snapshot only reads counters and state; polling never changes
//! anything it reports on.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::adapters::broker::{BrokerClient, BrokerStats};
use crate::adapters::resilience::RetryStats;
use crate::application::connections::{ConnectionManager, ConnectionStats};
use crate::domain::foundation::Timestamp;
use crate::ports::{CircuitBreakerMetrics, CircuitState, DeadLetterStore, EventSubscriber};

/// Point-in-time view of every subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub taken_at: Timestamp,
    pub status: HealthStatus,
    pub connections: ConnectionStats,
    pub circuits: BTreeMap<String, CircuitBreakerMetrics>,
    pub retry: RetryStats,
    pub broker: BrokerStats,
    /// `None` when no store is configured or the store could not be read.
    pub dead_letter_depth: Option<usize>,
    pub event_subscribers: BTreeMap<String, usize>,
}

/// Coarse status derived from circuit states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    /// At least one guarded operation is not closed.
    Degraded,
}

/// Collects a [`MetricsSnapshot`] from the relay components.
pub struct RelayMetrics {
    connections: Arc<ConnectionManager>,
    broker: Arc<BrokerClient>,
    events: Arc<dyn EventSubscriber>,
    dead_letters: Option<Arc<dyn DeadLetterStore>>,
}

impl RelayMetrics {
    pub fn new(
        connections: Arc<ConnectionManager>,
        broker: Arc<BrokerClient>,
        events: Arc<dyn EventSubscriber>,
    ) -> Self {
        Self {
            connections,
            broker,
            events,
            dead_letters: None,
        }
    }

    pub fn with_dead_letter_store(mut self, store: Arc<dyn DeadLetterStore>) -> Self {
        self.dead_letters = Some(store);
        self
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let circuits: BTreeMap<String, CircuitBreakerMetrics> = self
            .broker
            .breakers()
            .metrics()
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();

        let status = if circuits.values().all(|m| m.state == CircuitState::Closed) {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };

        let dead_letter_depth = match &self.dead_letters {
            Some(store) => match store.depth().await {
                Ok(depth) => Some(depth),
                Err(e) => {
                    warn!(error = %e, "Could not read dead letter depth");
                    None
                }
            },
            None => None,
        };

        MetricsSnapshot {
            taken_at: Timestamp::now(),
            status,
            connections: self.connections.stats(),
            circuits,
            retry: self.broker.retry().stats(),
            broker: self.broker.stats(),
            dead_letter_depth,
            event_subscribers: self.events.subscriber_counts().into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::broker::{BrokerClientConfig, InMemoryTransport, PUBLISH_OPERATION};
    use crate::adapters::dead_letter::InMemoryDeadLetterStore;
    use crate::adapters::events::InMemoryEventBus;
    use crate::adapters::resilience::{CircuitBreakerRegistry, RetryHandler, RetryPolicy};
    use crate::application::connections::testing::FakeSink;
    use crate::domain::connection::TransportKind;
    use crate::domain::subject::SubjectRegistry;
    use crate::ports::{Admission, CircuitBreaker};

    fn metrics() -> (RelayMetrics, Arc<ConnectionManager>, Arc<BrokerClient>, Arc<InMemoryEventBus>) {
        let connections = Arc::new(ConnectionManager::default());
        let broker = Arc::new(BrokerClient::new(
            Arc::new(InMemoryTransport::new()),
            Arc::new(SubjectRegistry::with_default_patterns()),
            Arc::new(CircuitBreakerRegistry::default()),
            Arc::new(RetryHandler::new(RetryPolicy::default())),
            BrokerClientConfig::default(),
        ));
        let bus = Arc::new(InMemoryEventBus::new());
        let metrics = RelayMetrics::new(connections.clone(), broker.clone(), bus.clone())
            .with_dead_letter_store(Arc::new(InMemoryDeadLetterStore::new()));
        (metrics, connections, broker, bus)
    }

    #[tokio::test]
    async fn snapshot_reports_every_subsystem() {
        let (metrics, connections, broker, bus) = metrics();
        connections.establish("p1", TransportKind::Push, "s1", FakeSink::push()).unwrap();
        connections.establish("p1", TransportKind::Stream, "s1", FakeSink::stream()).unwrap();
        bus.subscribe_fn("combat.hit", "Noop", |_| Ok(()));
        broker.breakers().get(PUBLISH_OPERATION);

        let snapshot = metrics.snapshot().await;

        assert_eq!(snapshot.status, HealthStatus::Ok);
        assert_eq!(snapshot.connections.by_transport(TransportKind::Push), 1);
        assert_eq!(snapshot.connections.by_transport(TransportKind::Stream), 1);
        assert_eq!(snapshot.circuits[PUBLISH_OPERATION].state, CircuitState::Closed);
        assert_eq!(snapshot.dead_letter_depth, Some(0));
        assert_eq!(snapshot.event_subscribers["combat.hit"], 1);
        assert_eq!(snapshot.broker.transport, "in_memory");
    }

    #[tokio::test]
    async fn open_circuit_degrades_status() {
        let (metrics, _, broker, _) = metrics();
        let breaker = broker.breakers().get(PUBLISH_OPERATION);
        for _ in 0..breaker.config().failure_threshold {
            breaker.record_failure(Admission::Allowed);
        }

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.status, HealthStatus::Degraded);
        assert_eq!(snapshot.circuits[PUBLISH_OPERATION].state, CircuitState::Open);
    }

    #[tokio::test]
    async fn snapshot_serializes_as_json() {
        let (metrics, _, _, _) = metrics();
        let json = serde_json::to_value(metrics.snapshot().await).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["connections"]["total"].is_number());
    }
}
