//! Integration tests for the relay pipeline.
//!
//! These tests drive the public API end to end with in-memory adapters:
//! 1. Connections fan out and get superseded by a newer session
//! 2. Subject patterns build and reject subjects
//! 3. Publish exhausts retries, dead-letters, and is replayed later
//! 4. An in-process event crosses the broker and reaches a socket queue

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use game_relay::adapters::broker::{
    BrokerClient, BrokerClientConfig, DeliveryRelay, InMemoryTransport, PublishOutcome,
    PUBLISH_OPERATION,
};
use game_relay::adapters::channels::{ChannelSink, Frame};
use game_relay::adapters::dead_letter::InMemoryDeadLetterStore;
use game_relay::adapters::events::{BrokerBridge, InMemoryEventBus};
use game_relay::adapters::resilience::{CircuitBreakerRegistry, RetryHandler, RetryPolicy};
use game_relay::application::{ConnectionManager, DeadLetterService, ReplayOutcome};
use game_relay::domain::connection::{CloseReason, OutboundMessage, TransportKind};
use game_relay::domain::foundation::{EventEnvelope, IdentityId, SessionId};
use game_relay::domain::subject::{Subject, SubjectError, SubjectRegistry};
use game_relay::ports::{
    BrokerMessage, CircuitBreaker, CircuitBreakerConfig, CircuitState, DeadLetterStore,
    EventPublisher,
};

// =============================================================================
// Test Infrastructure
// =============================================================================

fn identity(id: &str) -> IdentityId {
    IdentityId::new(id).unwrap()
}

/// Drains everything queued so far, without waiting.
fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

fn broker_with(
    transport: Arc<InMemoryTransport>,
    retry: RetryHandler,
    breaker: CircuitBreakerConfig,
) -> Arc<BrokerClient> {
    Arc::new(BrokerClient::new(
        transport,
        Arc::new(SubjectRegistry::with_default_patterns()),
        Arc::new(CircuitBreakerRegistry::new(breaker)),
        Arc::new(retry),
        BrokerClientConfig::default(),
    ))
}

// =============================================================================
// Connection supersession
// =============================================================================

#[tokio::test]
async fn new_session_supersedes_both_transports_of_the_old_one() {
    let connections = ConnectionManager::default();
    let p1 = identity("p1");

    let (push, mut push_rx) = ChannelSink::new(TransportKind::Push, 8);
    let (stream, mut stream_rx) = ChannelSink::new(TransportKind::Stream, 8);
    let old_push = connections.establish("p1", TransportKind::Push, "s1", push).unwrap();
    let old_stream = connections.establish("p1", TransportKind::Stream, "s1", stream).unwrap();

    let report = connections
        .deliver(&p1, &OutboundMessage::new("combat.hit", json!({"damage": 3})))
        .await;
    assert_eq!(report.delivered(), 2);
    assert_eq!(report.failed(), 0);

    let (newer, mut newer_rx) = ChannelSink::new(TransportKind::Push, 8);
    let new_push = connections.establish("p1", TransportKind::Push, "s2", newer).unwrap();
    let mut superseded = connections
        .supersede_session(&p1, &SessionId::new("s2").unwrap())
        .await;
    superseded.sort();
    let mut expected = vec![old_push, old_stream];
    expected.sort();
    assert_eq!(superseded, expected);

    let report = connections
        .deliver(&p1, &OutboundMessage::new("combat.miss", json!({})))
        .await;
    assert_eq!(report.delivered(), 1);
    assert_eq!(report.delivered_ids, vec![new_push]);

    // Old sockets got the first message and then a close frame.
    for rx in [&mut push_rx, &mut stream_rx] {
        let frames = drain(rx);
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Frame::Message(m) if m.contains("combat.hit")));
        assert_eq!(frames[1], Frame::Close(CloseReason::Superseded));
    }
    let frames = drain(&mut newer_rx);
    assert!(matches!(frames.as_slice(), [Frame::Message(m)] if m.contains("combat.miss")));
}

#[tokio::test]
async fn shutdown_closes_live_sockets_and_refuses_new_ones() {
    let connections = ConnectionManager::default();
    let (sink, mut rx) = ChannelSink::new(TransportKind::Stream, 4);
    connections.establish("p1", TransportKind::Stream, "s1", sink).unwrap();

    assert_eq!(connections.shutdown().await, 1);
    assert_eq!(drain(&mut rx), vec![Frame::Close(CloseReason::Shutdown)]);

    let (late, _late_rx) = ChannelSink::new(TransportKind::Push, 4);
    assert!(connections.establish("p2", TransportKind::Push, "s1", late).is_err());
}

// =============================================================================
// Subject patterns
// =============================================================================

#[test]
fn room_say_pattern_builds_and_rejects_missing_parameter() {
    let registry = SubjectRegistry::new();
    registry
        .register_pattern("room_say", "chat.say.room.{room_id}", &["room_id"], "")
        .unwrap();

    let subject = registry.build_subject("room_say", &[("room_id", "library")]).unwrap();
    assert_eq!(subject.as_str(), "chat.say.room.library");

    let err = registry.build_subject("room_say", &[]).unwrap_err();
    assert!(matches!(err, SubjectError::MissingParameter { .. }));
}

// =============================================================================
// Dead letters
// =============================================================================

#[tokio::test(start_paused = true)]
async fn exhausted_publish_is_dead_lettered_and_replayed_after_cooldown() {
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryDeadLetterStore::new());
    let retry = RetryHandler::new(RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        jitter_ratio: 0.0,
    })
    .with_dead_letter_store(store.clone());
    let broker = broker_with(
        transport.clone(),
        retry,
        CircuitBreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(2),
            ..Default::default()
        },
    );
    let service = DeadLetterService::new(store.clone(), broker.clone());

    transport.fail_next_publishes(5);
    let message = BrokerMessage::new(
        Subject::parse("game.zone.north.broadcast").unwrap(),
        "zone.broadcast",
        json!({"text": "storm incoming"}),
    );
    let id = match broker.publish(message).await.unwrap() {
        PublishOutcome::DeadLettered { id, attempts } => {
            assert_eq!(attempts, 3);
            id
        }
        other => panic!("expected dead letter, got {:?}", other),
    };
    let entry = service.get(id).await.unwrap();
    assert_eq!(entry.attempts, 3);
    assert_eq!(entry.subject.as_str(), "game.zone.north.broadcast");

    // Two more failures open the circuit.
    for expected_attempts in [4, 5] {
        let outcome = service.replay(id).await.unwrap();
        assert!(
            matches!(outcome, ReplayOutcome::Failed { attempts, .. } if attempts == expected_attempts)
        );
    }
    let breaker = broker.breakers().get(PUBLISH_OPERATION);
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(2)).await;

    assert_eq!(service.replay(id).await.unwrap(), ReplayOutcome::Replayed);
    assert_eq!(store.depth().await.unwrap(), 0);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

// =============================================================================
// End to end
// =============================================================================

#[tokio::test]
async fn bus_event_reaches_target_socket_through_the_broker() {
    let transport = Arc::new(InMemoryTransport::new());
    let broker = broker_with(
        transport,
        RetryHandler::new(RetryPolicy::default()),
        CircuitBreakerConfig::default(),
    );
    let connections = Arc::new(ConnectionManager::default());
    broker
        .subscribe("chat.>", Arc::new(DeliveryRelay::new(connections.clone())))
        .await
        .unwrap();

    let bus = InMemoryEventBus::new();
    let bridge = Arc::new(BrokerBridge::with_default_routes(broker.clone()));
    bridge.register(&bus);

    let (sink, mut rx) = ChannelSink::new(TransportKind::Stream, 8);
    connections.establish("p1", TransportKind::Stream, "s1", sink).unwrap();

    let event = EventEnvelope::new(
        "chat.room_said",
        json!({"room_id": "library", "text": "shh"}),
    )
    .with_targets([identity("p1"), identity("p2")]);
    bus.publish(event).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match frame {
        Frame::Message(text) => {
            let delivered: OutboundMessage = serde_json::from_str(&text).unwrap();
            assert_eq!(delivered.event_type, "chat.room_said");
            assert_eq!(delivered.payload["text"], "shh");
        }
        other => panic!("expected message frame, got {:?}", other),
    }
    assert_eq!(broker.stats().published, 1);
}
