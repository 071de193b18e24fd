//! DeadLetterStore port - Durable overflow for undeliverable messages.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::dead_letter::{DeadLetterEntry, DeadLetterFilter};
use crate::domain::foundation::{DeadLetterId, Timestamp};

/// Errors from dead letter storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeadLetterError {
    #[error("Dead letter not found: {0}")]
    NotFound(DeadLetterId),

    #[error("Dead letter storage I/O error: {0}")]
    Io(String),

    #[error("Dead letter serialization error: {0}")]
    Serialization(String),
}

/// Port for storing dead letters.
///
/// Every operation is async so file- or database-backed stores never block
/// the scheduler.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Inserts an entry, replacing any entry with the same id.
    async fn put(&self, entry: DeadLetterEntry) -> Result<(), DeadLetterError>;

    async fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterEntry>, DeadLetterError>;

    /// Entries matching the filter, oldest last failure first.
    async fn list(&self, filter: &DeadLetterFilter)
        -> Result<Vec<DeadLetterEntry>, DeadLetterError>;

    /// Removes an entry. Returns `false` if it was not present.
    async fn remove(&self, id: DeadLetterId) -> Result<bool, DeadLetterError>;

    /// Number of stored entries.
    async fn depth(&self) -> Result<usize, DeadLetterError>;

    /// Deletes entries whose last failure is before `cutoff`.
    /// Returns how many were removed.
    async fn purge_older_than(&self, cutoff: Timestamp) -> Result<usize, DeadLetterError>;
}
