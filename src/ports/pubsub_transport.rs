//! PubSubTransport port - The broker wire.
//!
//! Carries opaque payloads between server instances. Subject validation,
//! retries and circuit breaking live in the broker client; a transport only
//! moves bytes.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

use crate::domain::subject::{Subject, SubjectFilter};

/// Errors from the broker wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TransportError {
    /// Transient failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Unavailable(_) | TransportError::Timeout(_)
        )
    }
}

/// A raw message received from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub subject: Subject,
    pub payload: Vec<u8>,
}

/// Stream of messages matching one subscription.
///
/// The stream ends when the transport drops the subscription.
pub type InboundStream = BoxStream<'static, InboundMessage>;

/// Port for the publish/subscribe wire.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Backend name for logs and metrics (e.g. "redis", "in_memory").
    fn name(&self) -> &'static str;

    /// Publishes a payload on a literal subject.
    async fn publish(&self, subject: &Subject, payload: &[u8]) -> Result<(), TransportError>;

    /// Opens a subscription for every subject selected by `filter`.
    ///
    /// Returns once the broker has acknowledged the subscription.
    async fn subscribe(&self, filter: &SubjectFilter) -> Result<InboundStream, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn PubSubTransport) {}

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(TransportError::Unavailable("down".into()).is_retryable());
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!TransportError::Closed.is_retryable());
        assert!(!TransportError::Serialization("bad".into()).is_retryable());
    }
}
