//! Connection records owned by the connection manager.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{ConnectionId, IdentityId, SessionId, Timestamp};

/// Which transport carries a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Bidirectional, persistent channel (WebSocket).
    Push,
    /// Server-to-client only, persistent channel (SSE).
    Stream,
}

impl TransportKind {
    /// All transport kinds, for per-kind reporting.
    pub const ALL: [TransportKind; 2] = [TransportKind::Push, TransportKind::Stream];

    /// Whether clients can send frames back over this transport.
    pub fn is_bidirectional(&self) -> bool {
        matches!(self, TransportKind::Push)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Push => write!(f, "push"),
            TransportKind::Stream => write!(f, "stream"),
        }
    }
}

/// Liveness of a connection as seen by sends and health probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Sends and probes succeed.
    Alive,
    /// At least one probe failed but the failure threshold is not reached.
    Degraded,
    /// Send failed, probe threshold reached or idle timeout exceeded.
    /// Dead connections receive no further sends and are removed by the
    /// next cleanup.
    Dead,
}

impl Liveness {
    /// Whether deliveries should still be attempted.
    pub fn accepts_delivery(&self) -> bool {
        !matches!(self, Liveness::Dead)
    }
}

/// Why a connection left the identity connection set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Explicit `disconnect` / `disconnect_all`.
    Disconnected,
    /// Closed by `supersede_session`.
    Superseded,
    /// A send to the connection failed.
    SendFailed,
    /// Health probes failed too many times in a row.
    ProbeFailed,
    /// No activity within the idle timeout.
    IdleTimeout,
    /// Manager shutdown.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Disconnected => "disconnected",
            CloseReason::Superseded => "superseded",
            CloseReason::SendFailed => "send_failed",
            CloseReason::ProbeFailed => "probe_failed",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::Shutdown => "shutdown",
        };
        write!(f, "{}", s)
    }
}

/// One transport-level channel to one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub identity: IdentityId,
    pub transport: TransportKind,
    pub session: SessionId,
    pub created_at: Timestamp,
    pub last_activity: Timestamp,
    pub liveness: Liveness,
    /// Set when the connection went dead, so cleanup can report the cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_reason: Option<CloseReason>,
}

impl Connection {
    /// Creates a freshly established, alive connection.
    pub fn new(identity: IdentityId, transport: TransportKind, session: SessionId) -> Self {
        let now = Timestamp::now();
        Self {
            id: ConnectionId::new(),
            identity,
            transport,
            session,
            created_at: now,
            last_activity: now,
            liveness: Liveness::Alive,
            dead_reason: None,
        }
    }

    /// Records activity and restores `Alive` unless already dead.
    pub fn touch(&mut self) {
        self.last_activity = Timestamp::now();
        if self.liveness == Liveness::Degraded {
            self.liveness = Liveness::Alive;
        }
    }

    /// Marks the connection dead. The first reason wins.
    pub fn mark_dead(&mut self, reason: CloseReason) {
        if self.liveness != Liveness::Dead {
            self.liveness = Liveness::Dead;
            self.dead_reason = Some(reason);
        }
    }

    /// Whether the connection belongs to the given session.
    pub fn in_session(&self, session: &SessionId) -> bool {
        &self.session == session
    }

    pub fn is_dead(&self) -> bool {
        self.liveness == Liveness::Dead
    }
}
