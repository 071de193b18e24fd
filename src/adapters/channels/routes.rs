//! Router and shared state for the channel endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::application::connections::ConnectionManager;
use crate::application::metrics::{MetricsSnapshot, RelayMetrics};
use crate::domain::connection::ConnectionError;

use super::messages::ErrorResponse;
use super::{push, stream};

/// State shared by the push, stream and health handlers.
#[derive(Clone)]
pub struct ChannelState {
    pub connections: Arc<ConnectionManager>,
    pub metrics: Arc<RelayMetrics>,
    /// Outbound frames buffered per connection.
    pub sink_capacity: usize,
}

impl ChannelState {
    pub fn new(
        connections: Arc<ConnectionManager>,
        metrics: Arc<RelayMetrics>,
        sink_capacity: usize,
    ) -> Self {
        Self {
            connections,
            metrics,
            sink_capacity,
        }
    }
}

/// Handshake rejected by `ConnectionManager::establish`.
#[derive(Debug)]
pub struct ConnectRejection(pub ConnectionError);

impl ConnectRejection {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            ConnectionError::IdentityInvalid(_) | ConnectionError::SessionInvalid(_) => {
                StatusCode::BAD_REQUEST
            }
            ConnectionError::CapacityExceeded { .. } | ConnectionError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl From<ConnectionError> for ConnectRejection {
    fn from(err: ConnectionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ConnectRejection {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorResponse::from(&self.0))).into_response()
    }
}

/// GET /health - Metrics snapshot as JSON.
pub async fn health(State(state): State<ChannelState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot().await)
}

/// Routes:
/// - `GET /connect/push?identity=..&session=..` - WebSocket push channel
/// - `GET /connect/stream?identity=..&session=..` - SSE stream channel
/// - `GET /health` - Metrics snapshot
pub fn channel_router(state: ChannelState) -> Router {
    Router::new()
        .route("/connect/push", get(push::push_handler))
        .route("/connect/stream", get(stream::stream_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::CapacityLimit;
    use crate::domain::foundation::ValidationError;

    #[test]
    fn rejections_map_to_status_codes() {
        let invalid = ConnectRejection(ConnectionError::IdentityInvalid(
            ValidationError::empty_field("identity"),
        ));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let full = ConnectRejection(ConnectionError::CapacityExceeded {
            limit: CapacityLimit::PerIdentity,
            max: 8,
        });
        assert_eq!(full.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
