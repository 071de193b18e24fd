//! Connection Manager - Live connections per identity and delivery fan-out.
//!
//! # Locking
//!
//! ```text
//! identities: RwLock<identity -> Arc<Mutex<IdentitySlot>>>
//!                    │
//!                    └── slot: Mutex, one per identity, never held across .await
//! index:      RwLock<connection id -> identity>
//! ```
//!
//! Lock order is `identities` → slot → `index`. Mutations of one identity's
//! connection set serialize on its slot, so operations on different
//! identities proceed concurrently. Sends and probes run outside every slot
//! lock; their outcomes are applied afterwards under the slot lock, which
//! is also how the health sweep applies its results.
//!
//! Each connection also carries an async send lock. Sends and probes to one
//! connection take it in FIFO order, preserving per-connection ordering
//! while different connections send concurrently.

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as SendLock;
use tracing::{debug, error, info, warn};

use crate::domain::connection::{
    AggregateDeliveryReport, CapacityLimit, CloseReason, Connection, ConnectionError,
    DeliveryReport, Liveness, OutboundMessage, TransportKind,
};
use crate::domain::foundation::{ConnectionId, IdentityId, SessionId, Timestamp};
use crate::ports::{ConnectionSink, SinkError};

use super::closed_log::{ClosedConnection, ClosedLog};

/// Limits and timeouts for the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionManagerConfig {
    /// Process-wide connection ceiling.
    pub max_connections: usize,
    /// Ceiling per identity, across both transport kinds.
    pub max_per_identity: usize,
    pub send_timeout: Duration,
    pub probe_timeout: Duration,
    /// Consecutive failed probes before a connection is declared dead.
    pub failed_probe_threshold: u32,
    /// Push connections with no inbound activity for this long are dead.
    pub idle_timeout: Duration,
    pub closed_log_capacity: usize,
    pub closed_log_ttl: Duration,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_per_identity: 8,
            send_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            failed_probe_threshold: 3,
            idle_timeout: Duration::from_secs(120),
            closed_log_capacity: 1024,
            closed_log_ttl: Duration::from_secs(300),
        }
    }
}

pub(super) struct LiveConnection {
    pub(super) record: Connection,
    pub(super) sink: Arc<dyn ConnectionSink>,
    send_lock: Arc<SendLock<()>>,
    pub(super) failed_probes: u32,
}

impl LiveConnection {
    fn new(record: Connection, sink: Arc<dyn ConnectionSink>) -> Self {
        Self {
            record,
            sink,
            send_lock: Arc::new(SendLock::new(())),
            failed_probes: 0,
        }
    }

    pub(super) fn target(&self) -> SendTarget {
        SendTarget {
            id: self.record.id,
            sink: self.sink.clone(),
            send_lock: self.send_lock.clone(),
        }
    }

    /// A successful send or probe restores `Alive`.
    pub(super) fn mark_reachable(&mut self) {
        if self.record.liveness == Liveness::Degraded {
            self.record.liveness = Liveness::Alive;
        }
        if !self.record.is_dead() {
            self.failed_probes = 0;
        }
    }
}

/// What a send or probe needs, cloned out of the slot lock.
#[derive(Clone)]
pub(super) struct SendTarget {
    pub(super) id: ConnectionId,
    sink: Arc<dyn ConnectionSink>,
    send_lock: Arc<SendLock<()>>,
}

impl SendTarget {
    pub(super) async fn send(&self, frame: &str, timeout: Duration) -> Result<(), SinkError> {
        let _ordered = self.send_lock.lock().await;
        match tokio::time::timeout(timeout, self.sink.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout),
        }
    }

    pub(super) async fn probe(&self, timeout: Duration) -> Result<(), SinkError> {
        let _ordered = self.send_lock.lock().await;
        match tokio::time::timeout(timeout, self.sink.probe()).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout),
        }
    }
}

#[derive(Default)]
pub(super) struct IdentitySlot {
    pub(super) connections: Vec<LiveConnection>,
    /// Set when the slot is unlinked from the map; writers must re-fetch.
    retired: bool,
}

type SharedSlot = Arc<Mutex<IdentitySlot>>;

#[derive(Debug, Default)]
pub(super) struct ManagerCounters {
    established: AtomicU64,
    delivered: AtomicU64,
    failed_sends: AtomicU64,
    superseded: AtomicU64,
    pub(super) swept: AtomicU64,
    pub(super) failed_probes: AtomicU64,
}

/// Point-in-time connection counts. Reading it mutates nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub total: usize,
    pub push: usize,
    pub stream: usize,
    pub identities: usize,
    pub degraded: usize,
    pub dead: usize,
    pub established: u64,
    pub delivered: u64,
    pub failed_sends: u64,
    pub superseded: u64,
    pub swept: u64,
    pub failed_probes: u64,
    pub recently_closed: usize,
}

impl ConnectionStats {
    pub fn by_transport(&self, transport: TransportKind) -> usize {
        match transport {
            TransportKind::Push => self.push,
            TransportKind::Stream => self.stream,
        }
    }
}

/// Owns every live connection and fans messages out to them.
pub struct ConnectionManager {
    pub(super) config: ConnectionManagerConfig,
    identities: RwLock<HashMap<IdentityId, SharedSlot>>,
    index: RwLock<HashMap<ConnectionId, IdentityId>>,
    total: AtomicUsize,
    closed: Mutex<ClosedLog>,
    pub(super) counters: ManagerCounters,
    shutting_down: AtomicBool,
}

impl ConnectionManager {
    pub fn new(config: ConnectionManagerConfig) -> Self {
        let closed = ClosedLog::new(config.closed_log_capacity, config.closed_log_ttl);
        Self {
            config,
            identities: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            total: AtomicUsize::new(0),
            closed: Mutex::new(closed),
            counters: ManagerCounters::default(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConnectionManagerConfig {
        &self.config
    }

    // === Establishment ===

    /// Registers a new connection for `identity`.
    ///
    /// Existing connections of the identity are left alone, whatever their
    /// transport or session. Older sessions are only dropped by
    /// [`supersede_session`](Self::supersede_session).
    pub fn establish(
        &self,
        identity: &str,
        transport: TransportKind,
        session: &str,
        sink: Arc<dyn ConnectionSink>,
    ) -> Result<ConnectionId, ConnectionError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ConnectionError::ShuttingDown);
        }
        let identity = IdentityId::new(identity).map_err(ConnectionError::IdentityInvalid)?;
        let session = SessionId::new(session).map_err(ConnectionError::SessionInvalid)?;

        self.reserve()?;

        let record = Connection::new(identity.clone(), transport, session.clone());
        let id = record.id;
        let mut pending = Some(LiveConnection::new(record, sink));

        let placed = loop {
            let slot = self.slot_for(&identity);
            let mut guard = slot.lock();
            if guard.retired {
                continue;
            }
            if guard.connections.len() >= self.config.max_per_identity {
                break Err(ConnectionError::CapacityExceeded {
                    limit: CapacityLimit::PerIdentity,
                    max: self.config.max_per_identity,
                });
            }
            let new_session = !guard
                .connections
                .iter()
                .any(|c| c.record.in_session(&session));
            if let Some(live) = pending.take() {
                guard.connections.push(live);
            }
            self.index.write().insert(id, identity.clone());
            break Ok(new_session);
        };

        let new_session = match placed {
            Ok(new_session) => new_session,
            Err(e) => {
                self.total.fetch_sub(1, Ordering::SeqCst);
                warn!(identity = %identity, error = %e, "Connection rejected");
                return Err(e);
            }
        };

        self.counters.established.fetch_add(1, Ordering::Relaxed);
        info!(
            identity = %identity,
            connection_id = %id,
            transport = %transport,
            session = %session,
            new_session,
            "Connection established"
        );
        Ok(id)
    }

    fn reserve(&self) -> Result<(), ConnectionError> {
        let max = self.config.max_connections;
        self.total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| ConnectionError::CapacityExceeded {
                limit: CapacityLimit::Total,
                max,
            })
    }

    // === Removal ===

    /// Closes every connection of `identity` whose session differs from
    /// `new_session`. Callers invoke this only after the new session has
    /// successfully established.
    pub async fn supersede_session(
        &self,
        identity: &IdentityId,
        new_session: &SessionId,
    ) -> Vec<ConnectionId> {
        let removed = self.remove_where(identity, |c| !c.record.in_session(new_session));
        if removed.is_empty() {
            return Vec::new();
        }
        self.counters
            .superseded
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
        info!(
            identity = %identity,
            session = %new_session,
            superseded = removed.len(),
            "Superseded older session connections"
        );
        self.close_removed(removed, CloseReason::Superseded).await
    }

    /// Removes one connection. Unknown or already-removed ids are a no-op.
    /// Returns whether a connection was removed.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> bool {
        let Some(identity) = self.index.read().get(&connection_id).cloned() else {
            return false;
        };
        let removed = self.remove_where(&identity, |c| c.record.id == connection_id);
        if removed.is_empty() {
            return false;
        }
        debug!(identity = %identity, connection_id = %connection_id, "Connection disconnected");
        self.close_removed(removed, CloseReason::Disconnected).await;
        true
    }

    /// Removes every connection of `identity`.
    pub async fn disconnect_all(&self, identity: &IdentityId) -> Vec<ConnectionId> {
        let removed = self.remove_where(identity, |_| true);
        if removed.is_empty() {
            return Vec::new();
        }
        debug!(identity = %identity, count = removed.len(), "Identity disconnected");
        self.close_removed(removed, CloseReason::Disconnected).await
    }

    /// Closes every connection and refuses new ones.
    pub async fn shutdown(&self) -> usize {
        self.shutting_down.store(true, Ordering::SeqCst);
        let identities: Vec<IdentityId> = self.identities.read().keys().cloned().collect();
        let mut closed = 0;
        for identity in identities {
            let removed = self.remove_where(&identity, |_| true);
            closed += self.close_removed(removed, CloseReason::Shutdown).await.len();
        }
        info!(closed, "Connection manager shut down");
        closed
    }

    /// Unlinks matching connections from one identity and releases their
    /// capacity. Closing the sinks is left to the caller.
    pub(super) fn remove_where(
        &self,
        identity: &IdentityId,
        mut select: impl FnMut(&LiveConnection) -> bool,
    ) -> Vec<LiveConnection> {
        let Some(slot) = self.existing_slot(identity) else {
            return Vec::new();
        };

        let removed: Vec<LiveConnection> = {
            let mut guard = slot.lock();
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut guard.connections)
                .into_iter()
                .partition(|c| select(c));
            guard.connections = kept;
            if !removed.is_empty() {
                let mut index = self.index.write();
                for connection in &removed {
                    index.remove(&connection.record.id);
                }
            }
            removed
        };

        if !removed.is_empty() {
            self.total.fetch_sub(removed.len(), Ordering::SeqCst);
            self.prune_if_empty(identity);
        }
        removed
    }

    /// Records removals in the closed log and closes their sinks.
    /// Connections that died keep the reason they died with.
    pub(super) async fn close_removed(
        &self,
        removed: Vec<LiveConnection>,
        reason: CloseReason,
    ) -> Vec<ConnectionId> {
        let closed_at = Timestamp::now();
        {
            let mut log = self.closed.lock();
            for connection in &removed {
                log.record(ClosedConnection {
                    connection_id: connection.record.id,
                    identity: connection.record.identity.clone(),
                    reason: connection.record.dead_reason.unwrap_or(reason),
                    closed_at,
                });
            }
        }

        let timeout = self.config.send_timeout;
        join_all(removed.iter().map(|connection| {
            let reason = connection.record.dead_reason.unwrap_or(reason);
            async move {
                if tokio::time::timeout(timeout, connection.sink.close(reason))
                    .await
                    .is_err()
                {
                    debug!(connection_id = %connection.record.id, "Sink close timed out");
                }
            }
        }))
        .await;

        removed.into_iter().map(|c| c.record.id).collect()
    }

    // === Delivery ===

    /// Sends `message` to every live connection of `identity`, whatever the
    /// transport. Failed connections are marked dead and not retried.
    pub async fn deliver(&self, identity: &IdentityId, message: &OutboundMessage) -> DeliveryReport {
        let targets = self.live_targets(identity);
        if targets.is_empty() {
            return DeliveryReport::default();
        }
        match message.to_frame() {
            Ok(frame) => self.send_frame(identity, targets, &frame).await,
            Err(e) => {
                error!(identity = %identity, message_id = %message.message_id, error = %e, "Message could not be serialized");
                unsendable(targets)
            }
        }
    }

    /// Delivers `message` to many identities concurrently. One identity's
    /// failures never affect another's report.
    pub async fn broadcast(
        &self,
        identities: &[IdentityId],
        message: &OutboundMessage,
    ) -> AggregateDeliveryReport {
        let mut seen = HashSet::new();
        let unique: Vec<&IdentityId> = identities.iter().filter(|id| seen.insert(*id)).collect();

        let frame = match message.to_frame() {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!(message_id = %message.message_id, error = %e, "Message could not be serialized");
                None
            }
        };

        let reports = join_all(unique.iter().map(|identity| {
            let frame = frame.as_deref();
            async move {
                let targets = self.live_targets(identity);
                let report = match frame {
                    _ if targets.is_empty() => DeliveryReport::default(),
                    Some(frame) => self.send_frame(identity, targets, frame).await,
                    None => unsendable(targets),
                };
                ((*identity).clone(), report)
            }
        }))
        .await;

        let mut aggregate = AggregateDeliveryReport::default();
        for (identity, report) in reports {
            aggregate.insert(identity, report);
        }
        aggregate
    }

    async fn send_frame(
        &self,
        identity: &IdentityId,
        targets: Vec<SendTarget>,
        frame: &str,
    ) -> DeliveryReport {
        let timeout = self.config.send_timeout;
        let outcomes = join_all(
            targets
                .iter()
                .map(|target| async move { (target.id, target.send(frame, timeout).await) }),
        )
        .await;

        let mut report = DeliveryReport {
            attempted: targets.len(),
            ..Default::default()
        };
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered_ids.push(id),
                Err(e) => {
                    debug!(identity = %identity, connection_id = %id, error = %e, "Send failed, marking connection dead");
                    report.failed_ids.push(id);
                }
            }
        }

        self.apply_send_outcomes(identity, &report);
        self.counters
            .delivered
            .fetch_add(report.delivered() as u64, Ordering::Relaxed);
        self.counters
            .failed_sends
            .fetch_add(report.failed() as u64, Ordering::Relaxed);
        report
    }

    fn apply_send_outcomes(&self, identity: &IdentityId, report: &DeliveryReport) {
        let Some(slot) = self.existing_slot(identity) else {
            return;
        };
        let mut guard = slot.lock();
        for connection in guard.connections.iter_mut() {
            if report.failed_ids.contains(&connection.record.id) {
                connection.record.mark_dead(CloseReason::SendFailed);
            } else if report.delivered_ids.contains(&connection.record.id) {
                connection.mark_reachable();
            }
        }
    }

    fn live_targets(&self, identity: &IdentityId) -> Vec<SendTarget> {
        let Some(slot) = self.existing_slot(identity) else {
            return Vec::new();
        };
        let guard = slot.lock();
        guard
            .connections
            .iter()
            .filter(|c| c.record.liveness.accepts_delivery())
            .map(LiveConnection::target)
            .collect()
    }

    // === Activity and inspection ===

    /// Records inbound client activity. Returns `false` for unknown or dead
    /// connections.
    pub fn touch(&self, connection_id: ConnectionId) -> bool {
        let Some(identity) = self.index.read().get(&connection_id).cloned() else {
            return false;
        };
        let Some(slot) = self.existing_slot(&identity) else {
            return false;
        };
        let mut guard = slot.lock();
        match guard
            .connections
            .iter_mut()
            .find(|c| c.record.id == connection_id)
        {
            Some(connection) if !connection.record.is_dead() => {
                connection.record.touch();
                connection.failed_probes = 0;
                true
            }
            _ => false,
        }
    }

    pub fn connections_for(&self, identity: &IdentityId) -> Vec<Connection> {
        let Some(slot) = self.existing_slot(identity) else {
            return Vec::new();
        };
        let guard = slot.lock();
        guard.connections.iter().map(|c| c.record.clone()).collect()
    }

    pub fn connection(&self, connection_id: ConnectionId) -> Option<Connection> {
        let identity = self.index.read().get(&connection_id).cloned()?;
        let slot = self.existing_slot(&identity)?;
        let guard = slot.lock();
        guard
            .connections
            .iter()
            .find(|c| c.record.id == connection_id)
            .map(|c| c.record.clone())
    }

    /// Whether the connection was removed within the closed-log TTL.
    pub fn was_recently_closed(&self, connection_id: ConnectionId) -> bool {
        self.closed.lock().contains(&connection_id)
    }

    pub fn recently_closed(&self) -> Vec<ClosedConnection> {
        self.closed.lock().recent()
    }

    pub fn total_connections(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ConnectionStats {
        let mut stats = ConnectionStats::default();
        for (_, slot) in self.slots() {
            let guard = slot.lock();
            if guard.connections.is_empty() {
                continue;
            }
            stats.identities += 1;
            for connection in &guard.connections {
                stats.total += 1;
                match connection.record.transport {
                    TransportKind::Push => stats.push += 1,
                    TransportKind::Stream => stats.stream += 1,
                }
                match connection.record.liveness {
                    Liveness::Alive => {}
                    Liveness::Degraded => stats.degraded += 1,
                    Liveness::Dead => stats.dead += 1,
                }
            }
        }
        stats.established = self.counters.established.load(Ordering::Relaxed);
        stats.delivered = self.counters.delivered.load(Ordering::Relaxed);
        stats.failed_sends = self.counters.failed_sends.load(Ordering::Relaxed);
        stats.superseded = self.counters.superseded.load(Ordering::Relaxed);
        stats.swept = self.counters.swept.load(Ordering::Relaxed);
        stats.failed_probes = self.counters.failed_probes.load(Ordering::Relaxed);
        stats.recently_closed = self.closed.lock().len();
        stats
    }

    // === Slots ===

    fn slot_for(&self, identity: &IdentityId) -> SharedSlot {
        if let Some(slot) = self.identities.read().get(identity) {
            return slot.clone();
        }
        self.identities
            .write()
            .entry(identity.clone())
            .or_default()
            .clone()
    }

    pub(super) fn existing_slot(&self, identity: &IdentityId) -> Option<SharedSlot> {
        self.identities.read().get(identity).cloned()
    }

    /// Snapshot of every identity slot.
    pub(super) fn slots(&self) -> Vec<(IdentityId, SharedSlot)> {
        self.identities
            .read()
            .iter()
            .map(|(identity, slot)| (identity.clone(), slot.clone()))
            .collect()
    }

    fn prune_if_empty(&self, identity: &IdentityId) {
        let mut identities = self.identities.write();
        let Some(slot) = identities.get(identity).cloned() else {
            return;
        };
        let mut guard = slot.lock();
        if guard.connections.is_empty() {
            guard.retired = true;
            identities.remove(identity);
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionManagerConfig::default())
    }
}

fn unsendable(targets: Vec<SendTarget>) -> DeliveryReport {
    DeliveryReport {
        attempted: targets.len(),
        delivered_ids: Vec::new(),
        failed_ids: targets.into_iter().map(|t| t.id).collect(),
    }
}
