//! Control frames exchanged with push and stream clients.
//!
//! Relayed game messages go out as serialized `OutboundMessage`s; the types
//! here cover only the connection's own lifecycle.

use serde::{Deserialize, Serialize};

use crate::domain::connection::{CloseReason, ConnectionError, TransportKind};
use crate::domain::foundation::{ConnectionId, Timestamp};

// ============================================
// Server → Client
// ============================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// First frame on every channel.
    Connected(ConnectedMessage),
    /// Reply to a client ping (push channel only).
    Pong(PongMessage),
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectedMessage {
    pub connection_id: ConnectionId,
    pub identity: String,
    pub session: String,
    pub transport: TransportKind,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PongMessage {
    pub timestamp: String,
}

impl ControlMessage {
    pub fn connected(
        connection_id: ConnectionId,
        params: &ConnectParams,
        transport: TransportKind,
    ) -> Self {
        ControlMessage::Connected(ConnectedMessage {
            connection_id,
            identity: params.identity.clone(),
            session: params.session.clone(),
            transport,
            timestamp: Timestamp::now().to_rfc3339(),
        })
    }

    pub fn pong() -> Self {
        ControlMessage::Pong(PongMessage {
            timestamp: Timestamp::now().to_rfc3339(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================
// Client → Server
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}

// ============================================
// Handshake
// ============================================

/// Query parameters of both connect endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectParams {
    pub identity: String,
    pub session: String,
}

/// Error body for rejected handshakes.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&ConnectionError> for ErrorResponse {
    fn from(err: &ConnectionError) -> Self {
        let code = match err {
            ConnectionError::IdentityInvalid(_) => "IDENTITY_INVALID",
            ConnectionError::SessionInvalid(_) => "SESSION_INVALID",
            ConnectionError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            ConnectionError::ShuttingDown => "SHUTTING_DOWN",
        };
        Self {
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

/// WebSocket close code sent for each close reason.
pub fn close_code(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::Disconnected => 1000,
        CloseReason::Shutdown => 1001,
        CloseReason::Superseded => 4001,
        CloseReason::IdleTimeout => 4002,
        CloseReason::SendFailed | CloseReason::ProbeFailed => 1011,
    }
}
