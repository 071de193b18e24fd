//! Relay server binary: wires the components and serves the channel endpoints.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use game_relay::adapters::broker::{BrokerClient, DeliveryRelay, InMemoryTransport, RedisTransport};
use game_relay::adapters::channels::{channel_router, ChannelState};
use game_relay::adapters::dead_letter::{FileDeadLetterStore, InMemoryDeadLetterStore};
use game_relay::adapters::events::{BrokerBridge, InMemoryEventBus};
use game_relay::adapters::resilience::{CircuitBreakerRegistry, RetryHandler};
use game_relay::application::{BackgroundTasks, ConnectionManager, DeadLetterService, RelayMetrics};
use game_relay::config::{AppConfig, DeadLetterBackend};
use game_relay::domain::subject::{SubjectRegistry, DEFAULT_VALIDATION_CACHE_SIZE};
use game_relay::ports::{DeadLetterStore, EventSubscriber, PubSubTransport};
use game_relay::telemetry;

/// Subjects whose messages are delivered to this instance's connections.
const DELIVERY_SUBSCRIPTIONS: &[&str] = &["game.>", "chat.>", "system.>"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;
    telemetry::init_tracing(&config.logging)?;

    let mut background = BackgroundTasks::new();

    let dead_letters: Arc<dyn DeadLetterStore> = match config.dead_letter.backend {
        DeadLetterBackend::Memory => Arc::new(InMemoryDeadLetterStore::new()),
        DeadLetterBackend::File => {
            let directory = config
                .dead_letter
                .directory
                .clone()
                .ok_or("dead_letter.directory is required for the file backend")?;
            Arc::new(FileDeadLetterStore::new(directory))
        }
    };

    let transport: Arc<dyn PubSubTransport> = match &config.redis {
        Some(redis) => {
            let connect = RedisTransport::connect(&redis.url);
            Arc::new(tokio::time::timeout(redis.connect_timeout(), connect).await??)
        }
        None => {
            info!("No Redis configured, running single-instance");
            Arc::new(InMemoryTransport::new())
        }
    };

    let registry = SubjectRegistry::with_limits(
        DEFAULT_VALIDATION_CACHE_SIZE,
        config.broker.max_wildcards,
    );
    registry.register_defaults();

    let retry = RetryHandler::new(config.resilience.retry.policy())
        .with_dead_letter_store(dead_letters.clone())
        .with_shutdown(background.shutdown_signal());

    let broker = Arc::new(BrokerClient::new(
        transport,
        Arc::new(registry),
        Arc::new(CircuitBreakerRegistry::new(
            config.resilience.circuit_breaker.breaker_config(),
        )),
        Arc::new(retry),
        config.broker.client_config(),
    ));

    let connections = Arc::new(ConnectionManager::new(config.connections.manager_config()));

    // Broker -> connections
    let relay = Arc::new(DeliveryRelay::new(connections.clone()));
    for pattern in DELIVERY_SUBSCRIPTIONS {
        broker.subscribe(pattern, relay.clone()).await?;
    }

    // Event bus -> broker
    let bus = Arc::new(InMemoryEventBus::new());
    let bridge = Arc::new(BrokerBridge::with_default_routes(broker.clone()));
    let bridge_handles = bridge.register(bus.as_ref());

    let dead_letter_service = Arc::new(DeadLetterService::new(dead_letters.clone(), broker.clone()));
    background.spawn_health_sweeper(connections.clone(), config.connections.health_interval());
    background.spawn_dead_letter_janitor(
        dead_letter_service,
        config.dead_letter.retention(),
        config.dead_letter.sweep_interval(),
    );

    let metrics = Arc::new(
        RelayMetrics::new(connections.clone(), broker.clone(), bus.clone())
            .with_dead_letter_store(dead_letters),
    );
    let state = ChannelState::new(connections.clone(), metrics, config.connections.sink_capacity);
    let app = channel_router(state);

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, environment = ?config.server.environment, "Game relay listening");

    let closing = connections.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Upgraded sockets are not tracked by the server; close them here.
            let closed = closing.shutdown().await;
            info!(closed, "Closed live connections");
        })
        .await?;

    for handle in &bridge_handles {
        bus.unsubscribe(handle);
    }
    let grace = config.shutdown.grace_period();
    broker.shutdown(grace).await;
    let report = background.shutdown(grace).await;
    if report.aborted > 0 {
        warn!(aborted = report.aborted, "Some background tasks were aborted");
    }
    info!("Game relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
