//! In-process pub/sub transport.
//!
//! Single-instance deployments use it in place of Redis; tests use its
//! failure injection to simulate broker outages.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::domain::subject::{Subject, SubjectFilter};
use crate::ports::{InboundMessage, InboundStream, PubSubTransport, TransportError};

/// Default buffer per subscriber before slow subscribers start lagging.
pub const DEFAULT_TRANSPORT_BUFFER: usize = 1024;

/// Broadcast-channel transport with failure injection.
pub struct InMemoryTransport {
    sender: broadcast::Sender<InboundMessage>,
    available: AtomicBool,
    fail_remaining: AtomicU32,
    publish_delay_ms: AtomicU64,
    publish_attempts: AtomicU64,
    published: AtomicU64,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_TRANSPORT_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self {
            sender,
            available: AtomicBool::new(true),
            fail_remaining: AtomicU32::new(0),
            publish_delay_ms: AtomicU64::new(0),
            publish_attempts: AtomicU64::new(0),
            published: AtomicU64::new(0),
        }
    }

    // === Failure injection ===

    /// Makes every operation fail with `Unavailable` until set back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fails the next `count` publishes with `Unavailable`.
    pub fn fail_next_publishes(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Delays every publish, e.g. to trip a publish timeout.
    pub fn set_publish_delay(&self, delay: Duration) {
        self.publish_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    // === Test helpers ===

    /// Publish calls made, failed ones included.
    pub fn publish_attempts(&self) -> u64 {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    /// Publishes that reached the wire.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), TransportError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unavailable("in-memory broker offline".to_string()))
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubTransport for InMemoryTransport {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn publish(&self, subject: &Subject, payload: &[u8]) -> Result<(), TransportError> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.publish_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.check_available()?;
        if self.take_injected_failure() {
            return Err(TransportError::Unavailable("injected failure".to_string()));
        }

        // No receivers is fine: nobody is subscribed yet.
        let _ = self.sender.send(InboundMessage {
            subject: subject.clone(),
            payload: payload.to_vec(),
        });
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, filter: &SubjectFilter) -> Result<InboundStream, TransportError> {
        self.check_available()?;

        let filter = filter.clone();
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| {
            let selected = match item {
                Ok(message) if filter.matches(&message.subject) => Some(message),
                Ok(_) => None,
                Err(lagged) => {
                    tracing::warn!(pattern = %filter, error = %lagged, "In-memory subscriber lagged");
                    None
                }
            };
            futures::future::ready(selected)
        });
        Ok(stream.boxed())
    }
}
