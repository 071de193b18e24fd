//! DeadLetterService - Operator inspection and replay of dead letters.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::broker::BrokerClient;
use crate::domain::dead_letter::{DeadLetterEntry, DeadLetterFilter};
use crate::domain::foundation::{DeadLetterId, Timestamp};
use crate::ports::{DeadLetterError, DeadLetterStore};

/// Result of replaying one dead letter.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    /// Published; the entry was removed.
    Replayed,
    /// Publish failed again; the entry stays with its failure recorded.
    Failed { attempts: u32, error: String },
}

impl ReplayOutcome {
    pub fn is_replayed(&self) -> bool {
        matches!(self, ReplayOutcome::Replayed)
    }
}

/// Inspection, replay and expiry over a [`DeadLetterStore`].
pub struct DeadLetterService {
    store: Arc<dyn DeadLetterStore>,
    broker: Arc<BrokerClient>,
}

impl DeadLetterService {
    pub fn new(store: Arc<dyn DeadLetterStore>, broker: Arc<BrokerClient>) -> Self {
        Self { store, broker }
    }

    pub fn store(&self) -> &Arc<dyn DeadLetterStore> {
        &self.store
    }

    pub async fn list(
        &self,
        filter: &DeadLetterFilter,
    ) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        self.store.list(filter).await
    }

    pub async fn get(&self, id: DeadLetterId) -> Result<DeadLetterEntry, DeadLetterError> {
        self.store
            .get(id)
            .await?
            .ok_or(DeadLetterError::NotFound(id))
    }

    pub async fn depth(&self) -> Result<usize, DeadLetterError> {
        self.store.depth().await
    }

    /// Re-attempts the publish once, bypassing retry.
    ///
    /// Success removes the entry. Failure updates its attempt count, last
    /// error and last-failure time and reports [`ReplayOutcome::Failed`];
    /// only store errors are returned as `Err`.
    pub async fn replay(&self, id: DeadLetterId) -> Result<ReplayOutcome, DeadLetterError> {
        let mut entry = self.get(id).await?;

        match self.broker.republish(&entry).await {
            Ok(()) => {
                self.store.remove(id).await?;
                info!(dead_letter_id = %id, subject = %entry.subject, "Dead letter replayed");
                Ok(ReplayOutcome::Replayed)
            }
            Err(e) => {
                entry.record_failure(e.to_string());
                let attempts = entry.attempts;
                let error = entry.last_error.clone();
                self.store.put(entry).await?;
                warn!(dead_letter_id = %id, attempts, error = %error, "Dead letter replay failed");
                Ok(ReplayOutcome::Failed { attempts, error })
            }
        }
    }

    /// Replays every entry the filter selects, oldest first.
    pub async fn replay_matching(
        &self,
        filter: &DeadLetterFilter,
    ) -> Result<Vec<(DeadLetterId, ReplayOutcome)>, DeadLetterError> {
        let mut outcomes = Vec::new();
        for entry in self.store.list(filter).await? {
            let outcome = self.replay(entry.id).await?;
            outcomes.push((entry.id, outcome));
        }
        Ok(outcomes)
    }

    pub async fn purge_older_than(&self, cutoff: Timestamp) -> Result<usize, DeadLetterError> {
        self.store.purge_older_than(cutoff).await
    }

    /// Drops entries whose last failure is older than `retention`.
    pub async fn expire(&self, retention: Duration) -> Result<usize, DeadLetterError> {
        let purged = self
            .store
            .purge_older_than(Timestamp::now().minus(retention))
            .await?;
        if purged > 0 {
            info!(purged, retention_secs = retention.as_secs(), "Expired dead letters");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::broker::{BrokerClientConfig, InMemoryTransport, PublishOutcome};
    use crate::adapters::dead_letter::InMemoryDeadLetterStore;
    use crate::adapters::resilience::{CircuitBreakerRegistry, RetryHandler, RetryPolicy};
    use crate::domain::subject::{Subject, SubjectRegistry};
    use crate::ports::{BrokerMessage, CircuitBreakerConfig};
    use serde_json::json;

    struct Fixture {
        service: DeadLetterService,
        broker: Arc<BrokerClient>,
        transport: Arc<InMemoryTransport>,
        store: Arc<InMemoryDeadLetterStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let transport = Arc::new(InMemoryTransport::new());
        let retry = RetryHandler::new(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_ratio: 0.0,
        })
        .with_dead_letter_store(store.clone());
        let broker = Arc::new(BrokerClient::new(
            transport.clone(),
            Arc::new(SubjectRegistry::with_default_patterns()),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
                failure_threshold: 100,
                ..Default::default()
            })),
            Arc::new(retry),
            BrokerClientConfig::default(),
        ));
        Fixture {
            service: DeadLetterService::new(store.clone(), broker.clone()),
            broker,
            transport,
            store,
        }
    }

    async fn dead_letter(fx: &Fixture, subject: &str) -> DeadLetterId {
        fx.transport.fail_next_publishes(2);
        let message = BrokerMessage::new(Subject::parse(subject).unwrap(), "zone.broadcast", json!({}));
        match fx.broker.publish(message).await.unwrap() {
            PublishOutcome::DeadLettered { id, .. } => id,
            other => panic!("expected dead letter, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn replay_success_removes_entry() {
        let fx = fixture();
        let id = dead_letter(&fx, "game.zone.north.broadcast").await;
        assert_eq!(fx.service.depth().await.unwrap(), 1);

        assert_eq!(fx.service.replay(id).await.unwrap(), ReplayOutcome::Replayed);
        assert_eq!(fx.service.depth().await.unwrap(), 0);
        assert!(matches!(fx.service.get(id).await, Err(DeadLetterError::NotFound(_))));
    }

    #[tokio::test]
    async fn replay_failure_records_attempt() {
        let fx = fixture();
        let id = dead_letter(&fx, "game.zone.north.broadcast").await;

        fx.transport.fail_next_publishes(1);
        let outcome = fx.service.replay(id).await.unwrap();

        assert!(matches!(outcome, ReplayOutcome::Failed { attempts: 3, .. }));
        let entry = fx.service.get(id).await.unwrap();
        assert_eq!(entry.attempts, 3);
        assert!(!entry.last_error.is_empty());
    }

    #[tokio::test]
    async fn replay_unknown_entry_is_not_found() {
        let fx = fixture();
        let missing = DeadLetterId::new();
        assert_eq!(
            fx.service.replay(missing).await.unwrap_err(),
            DeadLetterError::NotFound(missing)
        );
    }

    #[tokio::test]
    async fn list_and_replay_by_subject() {
        let fx = fixture();
        dead_letter(&fx, "game.zone.north.broadcast").await;
        dead_letter(&fx, "game.zone.south.broadcast").await;
        dead_letter(&fx, "system.announce.all").await;

        let zones = DeadLetterFilter::new().with_subject("game.zone.*.broadcast").unwrap();
        assert_eq!(fx.service.list(&zones).await.unwrap().len(), 2);

        let outcomes = fx.service.replay_matching(&zones).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, o)| o.is_replayed()));
        assert_eq!(fx.store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn expire_keeps_recent_entries() {
        let fx = fixture();
        dead_letter(&fx, "system.announce.all").await;

        assert_eq!(fx.service.expire(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(
            fx.service
                .purge_older_than(Timestamp::now().plus_secs(1))
                .await
                .unwrap(),
            1
        );
    }
}
