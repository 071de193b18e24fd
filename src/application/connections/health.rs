//! Health sweep: probes, idle detection and removal of dead connections.
//!
//! Probing happens outside the slot locks; results are applied under the
//! slot lock of the owning identity, the same discipline `deliver` uses, so
//! a sweep never races a removal or an in-flight delivery.

use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::Ordering;
use tracing::debug;

use crate::domain::connection::{CloseReason, Liveness};
use crate::domain::foundation::{ConnectionId, IdentityId};

use super::manager::{ConnectionManager, SendTarget};

/// Summary of one full sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub probed: usize,
    pub dead: Vec<ConnectionId>,
    pub removed: Vec<ConnectionId>,
}

impl ConnectionManager {
    /// Probes every connection that is not already dead and returns the ids
    /// of all dead connections.
    ///
    /// Push connections idle past the idle timeout are declared dead without
    /// a probe. A failed probe degrades a connection; the configured number
    /// of consecutive failures kills it.
    pub async fn check_health(&self) -> Vec<ConnectionId> {
        self.probe_all().await;
        self.dead_connections()
    }

    /// Removes dead connections, closing their sinks with the reason they
    /// died. Returns the removed ids.
    pub async fn cleanup_dead(&self) -> Vec<ConnectionId> {
        let mut removed_ids = Vec::new();
        for (identity, _) in self.slots() {
            let removed = self.remove_where(&identity, |c| c.record.is_dead());
            if removed.is_empty() {
                continue;
            }
            removed_ids.extend(self.close_removed(removed, CloseReason::SendFailed).await);
        }
        self.counters
            .swept
            .fetch_add(removed_ids.len() as u64, Ordering::Relaxed);
        removed_ids
    }

    /// `check_health` followed by `cleanup_dead`.
    pub async fn sweep(&self) -> SweepReport {
        let probed = self.probe_all().await;
        let dead = self.dead_connections();
        let removed = self.cleanup_dead().await;
        debug!(
            probed,
            dead = dead.len(),
            removed = removed.len(),
            "Connection health sweep finished"
        );
        SweepReport {
            probed,
            dead,
            removed,
        }
    }

    fn dead_connections(&self) -> Vec<ConnectionId> {
        let mut dead = Vec::new();
        for (_, slot) in self.slots() {
            let guard = slot.lock();
            dead.extend(
                guard
                    .connections
                    .iter()
                    .filter(|c| c.record.is_dead())
                    .map(|c| c.record.id),
            );
        }
        dead
    }

    /// Marks idle push connections dead and probes the rest. Returns the
    /// number of probes sent.
    async fn probe_all(&self) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let mut probes: Vec<(IdentityId, SendTarget)> = Vec::new();

        for (identity, slot) in self.slots() {
            let mut guard = slot.lock();
            for connection in guard.connections.iter_mut() {
                if connection.record.is_dead() {
                    continue;
                }
                if connection.record.transport.is_bidirectional()
                    && connection.record.last_activity.elapsed() >= idle_timeout
                {
                    connection.record.mark_dead(CloseReason::IdleTimeout);
                    debug!(identity = %identity, connection_id = %connection.record.id, "Connection idle, marking dead");
                    continue;
                }
                probes.push((identity.clone(), connection.target()));
            }
        }

        let timeout = self.config.probe_timeout;
        let outcomes = join_all(probes.iter().map(|(_, target)| target.probe(timeout))).await;

        let threshold = self.config.failed_probe_threshold.max(1);
        for ((identity, target), outcome) in probes.iter().zip(outcomes) {
            let Some(slot) = self.existing_slot(identity) else {
                continue;
            };
            let mut guard = slot.lock();
            // Removed while the probe was in flight.
            let Some(connection) = guard
                .connections
                .iter_mut()
                .find(|c| c.record.id == target.id)
            else {
                continue;
            };

            match outcome {
                Ok(()) => connection.mark_reachable(),
                Err(e) => {
                    self.counters.failed_probes.fetch_add(1, Ordering::Relaxed);
                    connection.failed_probes += 1;
                    if connection.failed_probes >= threshold {
                        connection.record.mark_dead(CloseReason::ProbeFailed);
                    } else if connection.record.liveness == Liveness::Alive {
                        connection.record.liveness = Liveness::Degraded;
                    }
                    debug!(
                        identity = %identity,
                        connection_id = %target.id,
                        failed_probes = connection.failed_probes,
                        error = %e,
                        "Probe failed"
                    );
                }
            }
        }

        probes.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::application::connections::testing::FakeSink;
    use crate::application::connections::{ConnectionManager, ConnectionManagerConfig};
    use crate::domain::connection::{CloseReason, Liveness, TransportKind};
    use std::time::Duration;

    fn manager(threshold: u32) -> ConnectionManager {
        ConnectionManager::new(ConnectionManagerConfig {
            failed_probe_threshold: threshold,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn failed_probes_degrade_then_kill() {
        let manager = manager(2);
        let sink = FakeSink::stream();
        sink.fail_probes(true);
        let id = manager
            .establish("p1", TransportKind::Stream, "s1", sink.clone())
            .unwrap();

        assert!(manager.check_health().await.is_empty());
        assert_eq!(manager.connection(id).unwrap().liveness, Liveness::Degraded);

        assert_eq!(manager.check_health().await, vec![id]);
        assert_eq!(manager.connection(id).unwrap().dead_reason, Some(CloseReason::ProbeFailed));
        assert_eq!(sink.probe_count(), 2);
    }

    #[tokio::test]
    async fn successful_probe_restores_alive() {
        let manager = manager(3);
        let sink = FakeSink::push();
        sink.fail_probes(true);
        let id = manager.establish("p1", TransportKind::Push, "s1", sink.clone()).unwrap();

        manager.check_health().await;
        assert_eq!(manager.connection(id).unwrap().liveness, Liveness::Degraded);

        sink.fail_probes(false);
        manager.check_health().await;
        assert_eq!(manager.connection(id).unwrap().liveness, Liveness::Alive);
    }

    #[tokio::test]
    async fn idle_push_connections_die_but_streams_are_probed() {
        let manager = ConnectionManager::new(ConnectionManagerConfig {
            idle_timeout: Duration::ZERO,
            ..Default::default()
        });
        let push = FakeSink::push();
        let stream = FakeSink::stream();
        let push_id = manager.establish("p1", TransportKind::Push, "s1", push.clone()).unwrap();
        manager.establish("p1", TransportKind::Stream, "s1", stream.clone()).unwrap();

        assert_eq!(manager.check_health().await, vec![push_id]);
        assert_eq!(push.probe_count(), 0);
        assert_eq!(stream.probe_count(), 1);
    }

    #[tokio::test]
    async fn cleanup_removes_dead_with_their_reason() {
        let manager = manager(1);
        let dying = FakeSink::push();
        dying.fail_probes(true);
        let healthy = FakeSink::stream();
        let dead_id = manager.establish("p1", TransportKind::Push, "s1", dying.clone()).unwrap();
        let live_id = manager.establish("p1", TransportKind::Stream, "s1", healthy).unwrap();

        let report = manager.sweep().await;

        assert_eq!(report.probed, 2);
        assert_eq!(report.removed, vec![dead_id]);
        assert_eq!(dying.closed_with(), Some(CloseReason::ProbeFailed));
        assert!(manager.was_recently_closed(dead_id));
        assert!(manager.connection(live_id).is_some());
        assert_eq!(manager.stats().swept, 1);
    }

    #[tokio::test]
    async fn send_failures_are_swept() {
        let manager = manager(3);
        let sink = FakeSink::push();
        sink.fail_sends(true);
        let id = manager.establish("p1", TransportKind::Push, "s1", sink.clone()).unwrap();
        let p1 = crate::domain::foundation::IdentityId::new("p1").unwrap();

        manager
            .deliver(&p1, &crate::domain::connection::OutboundMessage::new("x", serde_json::json!({})))
            .await;
        assert_eq!(manager.cleanup_dead().await, vec![id]);
        assert_eq!(sink.closed_with(), Some(CloseReason::SendFailed));
        assert_eq!(manager.stats().total, 0);
    }
}
