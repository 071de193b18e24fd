//! In-memory dead letter store.
//!
//! Used in single-instance deployments that accept losing dead letters on
//! restart, and in tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::domain::dead_letter::{DeadLetterEntry, DeadLetterFilter};
use crate::domain::foundation::{DeadLetterId, Timestamp};
use crate::ports::{DeadLetterError, DeadLetterStore};

#[derive(Debug, Default)]
pub struct InMemoryDeadLetterStore {
    entries: RwLock<HashMap<DeadLetterId, DeadLetterEntry>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries, for test assertions.
    pub fn snapshot(&self) -> Vec<DeadLetterEntry> {
        self.entries.read().values().cloned().collect()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn put(&self, entry: DeadLetterEntry) -> Result<(), DeadLetterError> {
        self.entries.write().insert(entry.id, entry);
        Ok(())
    }

    async fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterEntry>, DeadLetterError> {
        Ok(self.entries.read().get(&id).cloned())
    }

    async fn list(
        &self,
        filter: &DeadLetterFilter,
    ) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let entries: Vec<DeadLetterEntry> = self.entries.read().values().cloned().collect();
        Ok(filter.apply(entries))
    }

    async fn remove(&self, id: DeadLetterId) -> Result<bool, DeadLetterError> {
        Ok(self.entries.write().remove(&id).is_some())
    }

    async fn depth(&self) -> Result<usize, DeadLetterError> {
        Ok(self.entries.read().len())
    }

    async fn purge_older_than(&self, cutoff: Timestamp) -> Result<usize, DeadLetterError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.last_failed_at.is_before(&cutoff));
        Ok(before - entries.len())
    }
}
