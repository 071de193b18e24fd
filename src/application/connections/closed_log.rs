//! Bounded log of recently closed connections.
//!
//! Transports consult it to drop traffic that arrives for a connection the
//! manager already removed. Entries expire after a TTL and the oldest entry
//! is evicted once capacity is reached, so the log never grows with churn.

use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::connection::CloseReason;
use crate::domain::foundation::{ConnectionId, IdentityId, Timestamp};

/// One removal, as recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClosedConnection {
    pub connection_id: ConnectionId,
    pub identity: IdentityId,
    pub reason: CloseReason,
    pub closed_at: Timestamp,
}

/// LRU keyed by connection id, with a TTL checked on read.
///
/// Reads use `peek`, so recency is insertion order and the LRU entry is
/// always the oldest record.
#[derive(Debug)]
pub struct ClosedLog {
    ttl: Duration,
    entries: LruCache<ConnectionId, (ClosedConnection, Instant)>,
}

impl ClosedLog {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: LruCache::new(capacity),
        }
    }

    pub fn record(&mut self, closed: ClosedConnection) {
        let now = Instant::now();
        self.expire(now);
        self.entries.put(closed.connection_id, (closed, now));
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&ClosedConnection> {
        self.entries
            .peek(id)
            .filter(|(_, recorded)| recorded.elapsed() < self.ttl)
            .map(|(closed, _)| closed)
    }

    /// Unexpired entries, oldest first.
    pub fn recent(&self) -> Vec<ClosedConnection> {
        self.entries
            .iter()
            .rev()
            .filter(|(_, (_, recorded))| recorded.elapsed() < self.ttl)
            .map(|(_, (closed, _))| closed.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry older than the TTL.
    pub fn expire(&mut self, now: Instant) {
        while self
            .entries
            .peek_lru()
            .is_some_and(|(_, (_, recorded))| now.duration_since(*recorded) >= self.ttl)
        {
            self.entries.pop_lru();
        }
    }
}
