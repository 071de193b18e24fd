//! Broker client: validated publish/subscribe over a [`PubSubTransport`].
//!
//! Publishing runs `retry(circuit_breaker(timeout(transport.publish)))`.
//! Subjects are checked against the registry first, so malformed subjects
//! are rejected synchronously and never retried.
//!
//! Each subscription gets two tasks: an I/O pump that reads the transport
//! stream and a handler worker. They are joined by a bounded queue; the
//! pump never waits on the handler, it drops messages when the queue is
//! full. A slow handler therefore only delays its own subscription.
//!
//! When the transport ends a stream the pump opens a new one through the
//! same retry and `broker.subscribe` breaker as the initial subscribe, so a
//! listed subscription keeps receiving until it is stopped.

use futures::future::join_all;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::resilience::{
    guarded, CircuitBreakerRegistry, DeadLetterContext, GuardedError, RetryError, RetryHandler,
    Retryable,
};
use crate::domain::dead_letter::DeadLetterEntry;
use crate::domain::foundation::{DeadLetterId, EventEnvelope, SubscriptionId};
use crate::domain::subject::{Subject, SubjectFilter, SubjectRegistry};
use crate::ports::{
    BrokerMessage, CircuitBreaker, InboundStream, MessageHandler, PubSubTransport,
    TransportError,
};

use super::BrokerError;

/// Breaker name guarding publishes.
pub const PUBLISH_OPERATION: &str = "broker.publish";
/// Breaker name guarding subscription setup.
pub const SUBSCRIBE_OPERATION: &str = "broker.subscribe";

/// Broker client timeouts and queue sizes.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerClientConfig {
    /// Bound on a single transport publish.
    pub publish_timeout: Duration,
    /// Bound on waiting for a subscription acknowledgement.
    pub subscribe_timeout: Duration,
    /// Messages buffered per subscription before dropping.
    pub handler_queue_capacity: usize,
}

impl Default for BrokerClientConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(2),
            subscribe_timeout: Duration::from_secs(5),
            handler_queue_capacity: 256,
        }
    }
}

/// Successful (non-raising) result of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The transport accepted the message.
    Published { attempts: u32 },
    /// Attempts ran out; the message is in the dead letter store.
    DeadLettered { id: DeadLetterId, attempts: u32 },
}

#[derive(Debug, Default)]
struct SubscriptionCounters {
    received: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
    resubscribed: AtomicU64,
}

/// Opens transport streams under retry and the subscribe breaker.
#[derive(Clone)]
struct StreamSource {
    transport: Arc<dyn PubSubTransport>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: Arc<RetryHandler>,
    timeout: Duration,
}

impl StreamSource {
    async fn open(&self, filter: &SubjectFilter) -> Result<InboundStream, BrokerError> {
        let breaker = self.breakers.get(SUBSCRIBE_OPERATION);
        let breaker: &dyn CircuitBreaker = breaker.as_ref();
        self.retry
            .run(move |_| async move { self.open_once(breaker, filter).await })
            .await
            .map_err(flatten_retry_error)
    }

    async fn open_once(
        &self,
        breaker: &dyn CircuitBreaker,
        filter: &SubjectFilter,
    ) -> Result<InboundStream, BrokerError> {
        let timeout = self.timeout;
        guarded(breaker, || async {
            match tokio::time::timeout(timeout, self.transport.subscribe(filter)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            }
        })
        .await
        .map_err(from_guarded)
    }
}

struct ActiveSubscription {
    pattern: String,
    handler: &'static str,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    counters: Arc<SubscriptionCounters>,
}

#[derive(Debug, Default)]
struct PublishCounters {
    published: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Snapshot of one active subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    pub id: SubscriptionId,
    pub pattern: String,
    pub handler: &'static str,
    pub received: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub handled: u64,
    pub failed: u64,
    /// Times the transport stream ended and was reopened.
    pub resubscribed: u64,
}

/// Snapshot of broker client activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub transport: &'static str,
    pub published: u64,
    pub publish_failures: u64,
    pub dead_lettered: u64,
    pub subscriptions: Vec<SubscriptionStats>,
}

/// Publish/subscribe client with validation and resilience.
pub struct BrokerClient {
    transport: Arc<dyn PubSubTransport>,
    registry: Arc<SubjectRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: Arc<RetryHandler>,
    config: BrokerClientConfig,
    subscriptions: Mutex<HashMap<SubscriptionId, ActiveSubscription>>,
    counters: PublishCounters,
    shut_down: AtomicBool,
}

impl BrokerClient {
    pub fn new(
        transport: Arc<dyn PubSubTransport>,
        registry: Arc<SubjectRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        retry: Arc<RetryHandler>,
        config: BrokerClientConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            breakers,
            retry,
            config,
            subscriptions: Mutex::new(HashMap::new()),
            counters: PublishCounters::default(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<SubjectRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn retry(&self) -> &Arc<RetryHandler> {
        &self.retry
    }

    // === Subject patterns ===

    /// Adds a named subject template.
    pub fn register_pattern(
        &self,
        name: &str,
        template: &str,
        required_params: &[&str],
        description: &str,
    ) -> Result<(), BrokerError> {
        Ok(self
            .registry
            .register_pattern(name, template, required_params, description)?)
    }

    /// Builds a subject from a registered pattern.
    pub fn build_subject(
        &self,
        pattern_name: &str,
        params: &[(&str, &str)],
    ) -> Result<Subject, BrokerError> {
        Ok(self.registry.build_subject(pattern_name, params)?)
    }

    /// Whether a literal subject matches a registered pattern.
    pub fn validate(&self, subject: &str) -> bool {
        self.registry.validate(subject)
    }

    // === Publishing ===

    /// Builds the subject from `pattern_name` and publishes the event on it.
    pub async fn publish_pattern(
        &self,
        pattern_name: &str,
        params: &[(&str, &str)],
        envelope: &EventEnvelope,
    ) -> Result<PublishOutcome, BrokerError> {
        let subject = self.registry.build_subject(pattern_name, params)?;
        self.publish(BrokerMessage::from_envelope(subject, envelope))
            .await
    }

    /// Validates and publishes a message.
    ///
    /// Transient failures are retried. If retries run out and a dead letter
    /// store is configured, the message is stored and
    /// `PublishOutcome::DeadLettered` is returned; otherwise the final
    /// error is returned.
    pub async fn publish(&self, message: BrokerMessage) -> Result<PublishOutcome, BrokerError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(BrokerError::ShutDown);
        }

        let (subject, pattern_name) = self.registry.resolve(message.subject.as_str())?;
        self.registry.mark_published(&pattern_name);

        let payload = serde_json::to_vec(&message)?;
        let letter = DeadLetterContext {
            subject: subject.clone(),
            payload: serde_json::to_value(&message)?,
        };

        let breaker = self.breakers.get(PUBLISH_OPERATION);
        let breaker: &dyn CircuitBreaker = breaker.as_ref();
        let subject_ref = &subject;
        let payload_ref = payload.as_slice();

        let result = self
            .retry
            .run_or_dead_letter(letter, move |attempt| async move {
                self.publish_once(breaker, subject_ref, payload_ref)
                    .await
                    .map(|()| attempt)
            })
            .await;

        match result {
            Ok(attempts) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                debug!(subject = %subject, message_id = %message.message_id, attempts, "Published");
                Ok(PublishOutcome::Published { attempts })
            }
            Err(RetryError::DeadLettered { id, attempts, .. }) => {
                self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                Ok(PublishOutcome::DeadLettered { id, attempts })
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(flatten_retry_error(e))
            }
        }
    }

    /// One guarded publish attempt of a dead-lettered message, no retries.
    pub async fn republish(&self, entry: &DeadLetterEntry) -> Result<(), BrokerError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(BrokerError::ShutDown);
        }
        let (subject, pattern_name) = self.registry.resolve(entry.subject.as_str())?;
        self.registry.mark_published(&pattern_name);

        let payload = serde_json::to_vec(&entry.payload)?;
        let breaker = self.breakers.get(PUBLISH_OPERATION);
        self.publish_once(breaker.as_ref(), &subject, &payload).await?;
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn publish_once(
        &self,
        breaker: &dyn CircuitBreaker,
        subject: &Subject,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let timeout = self.config.publish_timeout;
        guarded(breaker, || async {
            match tokio::time::timeout(timeout, self.transport.publish(subject, payload)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            }
        })
        .await
        .map_err(from_guarded)
    }

    // === Subscribing ===

    /// Subscribes `handler` to every subject selected by `pattern`.
    ///
    /// Patterns that are all wildcards or use too many wildcards are
    /// rejected.
    pub async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, BrokerError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(BrokerError::ShutDown);
        }
        let filter = self.registry.check_subscription(pattern)?;

        let source = self.stream_source();
        let stream = source.open(&filter).await?;

        let id = SubscriptionId::new();
        let (queue_tx, queue_rx) = mpsc::channel(self.config.handler_queue_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let counters = Arc::new(SubscriptionCounters::default());
        let handler_name = handler.name();

        let pump = tokio::spawn(pump_messages(
            id,
            filter,
            stream,
            source,
            queue_tx,
            stop_rx,
            counters.clone(),
        ));
        let worker = tokio::spawn(run_handler(id, handler, queue_rx, counters.clone()));

        self.subscriptions.lock().insert(
            id,
            ActiveSubscription {
                pattern: pattern.to_string(),
                handler: handler_name,
                stop: stop_tx,
                tasks: vec![pump, worker],
                counters,
            },
        );

        info!(subscription_id = %id, pattern, handler = handler_name, "Subscribed");
        Ok(id)
    }

    fn stream_source(&self) -> StreamSource {
        StreamSource {
            transport: self.transport.clone(),
            breakers: self.breakers.clone(),
            retry: self.retry.clone(),
            timeout: self.config.subscribe_timeout,
        }
    }

    /// Stops a subscription. Messages already queued are still handled.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError> {
        let subscription = self
            .subscriptions
            .lock()
            .remove(&id)
            .ok_or(BrokerError::SubscriptionNotFound(id))?;
        let _ = subscription.stop.send(true);
        info!(subscription_id = %id, pattern = %subscription.pattern, "Unsubscribed");
        Ok(())
    }

    /// Stops every subscription and waits up to `grace` for their tasks,
    /// aborting any that are still running. Later calls fail with `ShutDown`.
    pub async fn shutdown(&self, grace: Duration) {
        self.shut_down.store(true, Ordering::SeqCst);
        let subscriptions: Vec<ActiveSubscription> = self
            .subscriptions
            .lock()
            .drain()
            .map(|(_, subscription)| subscription)
            .collect();

        let mut tasks = Vec::new();
        for subscription in subscriptions {
            let _ = subscription.stop.send(true);
            tasks.extend(subscription.tasks);
        }
        if tasks.is_empty() {
            return;
        }

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(grace, join_all(tasks)).await.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Subscription workers did not stop in time, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }
        info!("Broker client shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Activity counters. Read-only.
    pub fn stats(&self) -> BrokerStats {
        let mut subscriptions: Vec<SubscriptionStats> = self
            .subscriptions
            .lock()
            .iter()
            .map(|(id, sub)| SubscriptionStats {
                id: *id,
                pattern: sub.pattern.clone(),
                handler: sub.handler,
                received: sub.counters.received.load(Ordering::Relaxed),
                dropped: sub.counters.dropped.load(Ordering::Relaxed),
                malformed: sub.counters.malformed.load(Ordering::Relaxed),
                handled: sub.counters.handled.load(Ordering::Relaxed),
                failed: sub.counters.failed.load(Ordering::Relaxed),
                resubscribed: sub.counters.resubscribed.load(Ordering::Relaxed),
            })
            .collect();
        subscriptions.sort_by(|a, b| a.pattern.cmp(&b.pattern));

        BrokerStats {
            transport: self.transport.name(),
            published: self.counters.published.load(Ordering::Relaxed),
            publish_failures: self.counters.failed.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
            subscriptions,
        }
    }
}

fn from_guarded(err: GuardedError<TransportError>) -> BrokerError {
    match err {
        GuardedError::Open {
            operation,
            retry_after,
        } => BrokerError::CircuitOpen {
            operation,
            retry_after,
        },
        GuardedError::Inner(e) => BrokerError::Transport(e),
    }
}

fn flatten_retry_error(err: RetryError<BrokerError>) -> BrokerError {
    match err {
        RetryError::NonRetryable(e) => e,
        RetryError::Exhausted { last_error, .. } => last_error,
        RetryError::DeadLettered { last_error, .. } => last_error,
        RetryError::DeadLetterFailed { store_error, .. } => BrokerError::DeadLetter(store_error),
        RetryError::Cancelled { .. } => BrokerError::Cancelled,
    }
}

/// Reads the transport stream and feeds the handler queue.
async fn pump_messages(
    id: SubscriptionId,
    filter: SubjectFilter,
    mut stream: InboundStream,
    source: StreamSource,
    queue: mpsc::Sender<BrokerMessage>,
    mut stop: watch::Receiver<bool>,
    counters: Arc<SubscriptionCounters>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            next = stream.next() => {
                let Some(inbound) = next else {
                    warn!(subscription_id = %id, pattern = %filter, "Transport stream ended, resubscribing");
                    match reopen_stream(id, &filter, &source, &mut stop).await {
                        Some(reopened) => {
                            stream = reopened;
                            counters.resubscribed.fetch_add(1, Ordering::Relaxed);
                            info!(subscription_id = %id, pattern = %filter, "Resubscribed");
                            continue;
                        }
                        None => break,
                    }
                };
                counters.received.fetch_add(1, Ordering::Relaxed);

                let message: BrokerMessage = match serde_json::from_slice(&inbound.payload) {
                    Ok(message) => message,
                    Err(e) => {
                        counters.malformed.fetch_add(1, Ordering::Relaxed);
                        warn!(subscription_id = %id, subject = %inbound.subject, error = %e, "Dropping malformed broker message");
                        continue;
                    }
                };

                match queue.try_send(message) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(dropped)) => {
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            subscription_id = %id,
                            subject = %dropped.subject,
                            message_id = %dropped.message_id,
                            "Handler queue full, dropping message"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }
    }
    debug!(subscription_id = %id, "Subscription pump stopped");
}

/// Opens a replacement stream, pausing between rounds of retries.
///
/// Returns `None` once the subscription is stopped or the failure is
/// permanent.
async fn reopen_stream(
    id: SubscriptionId,
    filter: &SubjectFilter,
    source: &StreamSource,
    stop: &mut watch::Receiver<bool>,
) -> Option<InboundStream> {
    let policy = source.retry.policy();
    let mut pause = policy.base_delay;
    loop {
        tokio::select! {
            _ = stop.changed() => return None,
            _ = tokio::time::sleep(pause) => {}
        }
        let result = tokio::select! {
            _ = stop.changed() => return None,
            result = source.open(filter) => result,
        };
        match result {
            Ok(stream) => return Some(stream),
            Err(e) if e.is_retryable() => {
                warn!(subscription_id = %id, pattern = %filter, error = %e, "Resubscribe failed, will try again");
                pause = (pause * 2).min(policy.max_delay);
            }
            Err(e) => {
                error!(subscription_id = %id, pattern = %filter, error = %e, "Resubscribe failed permanently");
                return None;
            }
        }
    }
}

/// Runs the handler for each queued message, isolating errors and panics.
async fn run_handler(
    id: SubscriptionId,
    handler: Arc<dyn MessageHandler>,
    mut queue: mpsc::Receiver<BrokerMessage>,
    counters: Arc<SubscriptionCounters>,
) {
    while let Some(message) = queue.recv().await {
        let message_id = message.message_id.clone();
        match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
            Ok(Ok(())) => {
                counters.handled.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    subscription_id = %id,
                    handler = handler.name(),
                    message_id = %message_id,
                    error = %e,
                    "Broker message handler failed"
                );
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    subscription_id = %id,
                    handler = handler.name(),
                    message_id = %message_id,
                    "Broker message handler panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::broker::InMemoryTransport;
    use crate::adapters::dead_letter::InMemoryDeadLetterStore;
    use crate::adapters::resilience::RetryPolicy;
    use crate::domain::foundation::DomainError;
    use crate::domain::subject::SubjectError;
    use crate::ports::{CircuitBreakerConfig, CircuitState, DeadLetterStore};
    use async_trait::async_trait;
    use serde_json::json;

    struct Collect {
        tx: mpsc::UnboundedSender<BrokerMessage>,
    }

    #[async_trait]
    impl MessageHandler for Collect {
        async fn handle(&self, message: BrokerMessage) -> Result<(), DomainError> {
            let _ = self.tx.send(message);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Collect"
        }
    }

    struct Stuck;

    #[async_trait]
    impl MessageHandler for Stuck {
        async fn handle(&self, _message: BrokerMessage) -> Result<(), DomainError> {
            futures::future::pending::<()>().await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Stuck"
        }
    }

    struct Panics;

    #[async_trait]
    impl MessageHandler for Panics {
        async fn handle(&self, _message: BrokerMessage) -> Result<(), DomainError> {
            panic!("handler bug");
        }

        fn name(&self) -> &'static str {
            "Panics"
        }
    }

    /// Hands out one stream that ends at once, then delegates.
    struct EndsFirstStream {
        inner: InMemoryTransport,
        ended: AtomicBool,
    }

    impl EndsFirstStream {
        fn new() -> Self {
            Self {
                inner: InMemoryTransport::new(),
                ended: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl PubSubTransport for EndsFirstStream {
        fn name(&self) -> &'static str {
            "ends_first"
        }

        async fn publish(&self, subject: &Subject, payload: &[u8]) -> Result<(), TransportError> {
            self.inner.publish(subject, payload).await
        }

        async fn subscribe(&self, filter: &SubjectFilter) -> Result<InboundStream, TransportError> {
            if !self.ended.swap(true, Ordering::SeqCst) {
                return Ok(futures::stream::empty().boxed());
            }
            self.inner.subscribe(filter).await
        }
    }

    fn client_over(transport: Arc<dyn PubSubTransport>) -> BrokerClient {
        BrokerClient::new(
            transport,
            Arc::new(SubjectRegistry::with_default_patterns()),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
                failure_threshold: 100,
                ..Default::default()
            })),
            Arc::new(RetryHandler::new(RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
                jitter_ratio: 0.0,
            })),
            BrokerClientConfig::default(),
        )
    }

    fn collector() -> (Arc<Collect>, mpsc::UnboundedReceiver<BrokerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Collect { tx }), rx)
    }

    struct Fixture {
        transport: Arc<InMemoryTransport>,
        store: Arc<InMemoryDeadLetterStore>,
        client: BrokerClient,
    }

    fn fixture_with(breaker: CircuitBreakerConfig, queue: usize, dead_letters: bool) -> Fixture {
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let mut retry = RetryHandler::new(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter_ratio: 0.0,
        });
        if dead_letters {
            retry = retry.with_dead_letter_store(store.clone());
        }
        let client = BrokerClient::new(
            transport.clone(),
            Arc::new(SubjectRegistry::with_default_patterns()),
            Arc::new(CircuitBreakerRegistry::new(breaker)),
            Arc::new(retry),
            BrokerClientConfig {
                handler_queue_capacity: queue,
                ..Default::default()
            },
        );
        Fixture {
            transport,
            store,
            client,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(CircuitBreakerConfig::default(), 16, true)
    }

    fn room_message(room: &str) -> BrokerMessage {
        BrokerMessage::new(
            Subject::parse(format!("chat.say.room.{}", room)).unwrap(),
            "chat.room_said",
            json!({"text": "hello"}),
        )
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<BrokerMessage>) -> Option<BrokerMessage> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscriber() {
        let f = fixture();
        let (handler, mut rx) = collector();
        f.client.subscribe("chat.say.room.*", handler).await.unwrap();

        let outcome = f.client.publish(room_message("library")).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Published { attempts: 1 });

        let received = recv(&mut rx).await.unwrap();
        assert_eq!(received.subject.as_str(), "chat.say.room.library");
        assert_eq!(received.payload["text"], "hello");
    }

    #[tokio::test]
    async fn unregistered_subject_is_rejected_without_sending() {
        let f = fixture();
        let message = BrokerMessage::new(
            Subject::parse("chat.yell.room.library").unwrap(),
            "chat.room_yelled",
            json!({}),
        );
        let err = f.client.publish(message).await.unwrap_err();

        assert!(matches!(err, BrokerError::Subject(SubjectError::Unregistered(_))));
        assert_eq!(f.transport.publish_attempts(), 0);
        assert_eq!(f.store.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn publish_pattern_builds_subject() {
        let f = fixture();
        let (handler, mut rx) = collector();
        f.client.subscribe("game.room.*.*", handler).await.unwrap();

        let envelope = EventEnvelope::new("game.door_opened", json!({"door": "north"}));
        f.client
            .publish_pattern(
                "room_event",
                &[("room_id", "library"), ("event", "door")],
                &envelope,
            )
            .await
            .unwrap();

        let received = recv(&mut rx).await.unwrap();
        assert_eq!(received.subject.as_str(), "game.room.library.door");
        assert_eq!(received.message_id, envelope.event_id);

        let err = f
            .client
            .publish_pattern("room_event", &[("room_id", "library")], &envelope)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Subject(SubjectError::MissingParameter { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let f = fixture();
        f.transport.fail_next_publishes(2);

        let outcome = f.client.publish(room_message("library")).await.unwrap();

        assert_eq!(outcome, PublishOutcome::Published { attempts: 3 });
        assert_eq!(f.transport.publish_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_publish_is_dead_lettered() {
        let f = fixture();
        f.transport.fail_next_publishes(5);

        let outcome = f.client.publish(room_message("library")).await.unwrap();

        let PublishOutcome::DeadLettered { id, attempts } = outcome else {
            panic!("expected dead letter");
        };
        assert_eq!(attempts, 3);
        let entry = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.payload["event_type"], "chat.room_said");
        assert_eq!(f.client.stats().dead_lettered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_publish_without_store_surfaces_error() {
        let f = fixture_with(CircuitBreakerConfig::default(), 16, false);
        f.transport.set_available(false);

        let err = f.client.publish(room_message("library")).await.unwrap_err();

        assert!(matches!(err, BrokerError::Transport(TransportError::Unavailable(_))));
        assert_eq!(f.transport.publish_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_timeout_counts_as_failure() {
        let f = fixture_with(CircuitBreakerConfig::default(), 16, false);
        f.transport.set_publish_delay(Duration::from_secs(10));

        let err = f.client.publish(room_message("library")).await.unwrap_err();

        assert!(matches!(err, BrokerError::Transport(TransportError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_short_circuits_publishes() {
        let f = fixture_with(
            CircuitBreakerConfig {
                failure_threshold: 2,
                cooldown: Duration::from_secs(30),
                ..Default::default()
            },
            16,
            false,
        );
        f.transport.set_available(false);

        let err = f.client.publish(room_message("library")).await.unwrap_err();

        // Two real attempts open the circuit; the third is rejected locally.
        assert!(matches!(err, BrokerError::CircuitOpen { .. }));
        assert_eq!(f.transport.publish_attempts(), 2);
        assert_eq!(
            f.client.breakers().states()[PUBLISH_OPERATION],
            CircuitState::Open
        );
    }

    #[tokio::test]
    async fn broad_subscriptions_are_rejected() {
        let f = fixture();
        let (handler, _rx) = collector();
        for pattern in ["*.*", ">", "game.*.*.*"] {
            let err = f.client.subscribe(pattern, handler.clone()).await.unwrap_err();
            assert!(matches!(
                err,
                BrokerError::Subject(SubjectError::SubscriptionTooBroad { .. })
            ));
        }
    }

    #[tokio::test]
    async fn slow_handler_does_not_block_other_subscriptions() {
        let f = fixture();
        f.client.subscribe("chat.say.room.*", Arc::new(Stuck)).await.unwrap();
        let (handler, mut rx) = collector();
        f.client.subscribe("chat.say.room.>", handler).await.unwrap();

        for room in ["a", "b", "c"] {
            f.client.publish(room_message(room)).await.unwrap();
        }

        for _ in 0..3 {
            assert!(recv(&mut rx).await.is_some());
        }
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let f = fixture_with(CircuitBreakerConfig::default(), 1, true);
        f.client.subscribe("chat.say.room.*", Arc::new(Stuck)).await.unwrap();

        for i in 0..5 {
            f.client.publish(room_message(&format!("r{}", i))).await.unwrap();
        }

        let client = &f.client;
        wait_for(|| client.stats().subscriptions[0].received == 5).await;
        let stats = &client.stats().subscriptions[0];
        assert_eq!(stats.received, 5);
        assert!(stats.dropped >= 3, "dropped {}", stats.dropped);
    }

    #[tokio::test]
    async fn handler_panic_is_isolated() {
        let f = fixture();
        f.client.subscribe("chat.say.room.*", Arc::new(Panics)).await.unwrap();

        f.client.publish(room_message("a")).await.unwrap();
        f.client.publish(room_message("b")).await.unwrap();

        let client = &f.client;
        wait_for(|| client.stats().subscriptions[0].failed == 2).await;
        assert_eq!(client.stats().subscriptions[0].failed, 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let f = fixture();
        let (handler, mut rx) = collector();
        let id = f.client.subscribe("chat.say.room.*", handler).await.unwrap();

        f.client.unsubscribe(id).unwrap();
        assert!(matches!(
            f.client.unsubscribe(id),
            Err(BrokerError::SubscriptionNotFound(missing)) if missing == id
        ));

        f.client.publish(room_message("library")).await.unwrap();
        assert!(recv(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn ended_transport_stream_is_reopened() {
        let client = client_over(Arc::new(EndsFirstStream::new()));
        let (handler, mut rx) = collector();
        client.subscribe("chat.say.room.*", handler).await.unwrap();

        let c = &client;
        wait_for(|| c.stats().subscriptions[0].resubscribed == 1).await;
        assert_eq!(client.stats().subscriptions[0].resubscribed, 1);

        let sent = room_message("library");
        client.publish(sent.clone()).await.unwrap();
        let received = recv(&mut rx).await.unwrap();
        assert_eq!(received.message_id, sent.message_id);
        assert_eq!(client.stats().subscriptions[0].handled, 1);
    }

    #[tokio::test]
    async fn resubscribe_keeps_trying_until_transport_recovers() {
        let transport = Arc::new(EndsFirstStream::new());
        transport.inner.set_available(false);
        let client = client_over(transport.clone());
        let (handler, mut rx) = collector();
        client.subscribe("chat.say.room.*", handler).await.unwrap();

        // Several retry rounds fail while the broker is down.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.stats().subscriptions[0].resubscribed, 0);

        transport.inner.set_available(true);
        let c = &client;
        wait_for(|| c.stats().subscriptions[0].resubscribed == 1).await;

        client.publish(room_message("library")).await.unwrap();
        assert!(recv(&mut rx).await.is_some());
    }

    #[tokio::test]
    async fn unsubscribe_ends_pending_resubscribe() {
        let transport = Arc::new(EndsFirstStream::new());
        transport.inner.set_available(false);
        let client = client_over(transport.clone());
        let (handler, mut rx) = collector();
        let id = client.subscribe("chat.say.room.*", handler).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        client.unsubscribe(id).unwrap();
        transport.inner.set_available(true);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(client.stats().subscriptions.is_empty());
        client.publish(room_message("library")).await.unwrap();
        assert!(recv(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn published_patterns_become_immutable() {
        let f = fixture();
        f.client.publish(room_message("library")).await.unwrap();

        let err = f.client.registry().unregister_pattern("room_say").unwrap_err();
        assert_eq!(err, SubjectError::PatternInUse("room_say".to_string()));
    }

    #[tokio::test]
    async fn republish_sends_stored_payload_once() {
        let f = fixture();
        let (handler, mut rx) = collector();
        f.client.subscribe("chat.say.room.*", handler).await.unwrap();

        let original = room_message("library");
        let entry = DeadLetterEntry::new(
            original.subject.clone(),
            serde_json::to_value(&original).unwrap(),
            3,
            crate::domain::foundation::Timestamp::now(),
            "broker unavailable",
        );
        f.client.republish(&entry).await.unwrap();

        let received = recv(&mut rx).await.unwrap();
        assert_eq!(received.message_id, original.message_id);

        f.transport.set_available(false);
        assert!(f.client.republish(&entry).await.is_err());
        assert_eq!(f.transport.publish_attempts(), 2);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let f = fixture();
        let (handler, _rx) = collector();
        f.client.subscribe("chat.say.room.*", handler).await.unwrap();

        f.client.shutdown(Duration::from_secs(1)).await;

        assert!(f.client.stats().subscriptions.is_empty());
        assert!(matches!(
            f.client.publish(room_message("library")).await,
            Err(BrokerError::ShutDown)
        ));
    }
}
