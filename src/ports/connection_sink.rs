//! ConnectionSink port - One live transport channel to a client.
//!
//! The transport-terminating layer (WebSocket handler, SSE handler) creates a
//! sink per connection and hands it to the connection manager. The manager
//! only ever talks to clients through this trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::connection::{CloseReason, TransportKind};

/// Errors from sending to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The client side has gone away.
    #[error("Connection closed")]
    Closed,

    /// The send did not complete in time.
    #[error("Send timed out")]
    Timeout,

    /// The outbound queue is full; the client is not keeping up.
    #[error("Outbound queue full")]
    Backpressure,

    #[error("Transport I/O error: {0}")]
    Io(String),
}

/// Port for one transport-level channel.
///
/// Implementations must not block: a slow client should surface as
/// `Backpressure` or `Timeout`, never as an indefinitely pending send.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    /// Which kind of channel this is.
    fn transport(&self) -> TransportKind;

    /// Sends one serialized message frame.
    async fn send(&self, frame: &str) -> Result<(), SinkError>;

    /// Sends a lightweight keepalive used by health checks.
    async fn probe(&self) -> Result<(), SinkError>;

    /// Asks the transport to close. Never fails; closing a closed sink is a no-op.
    async fn close(&self, reason: CloseReason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn ConnectionSink) {}

    #[test]
    fn sink_errors_display() {
        assert_eq!(SinkError::Backpressure.to_string(), "Outbound queue full");
        assert_eq!(
            SinkError::Io("reset".to_string()).to_string(),
            "Transport I/O error: reset"
        );
    }
}
