//! Push channel: bidirectional WebSocket.
//!
//! Connection lifecycle:
//! 1. Establish with the connection manager (rejections are plain HTTP errors)
//! 2. Upgrade and send the `connected` frame
//! 3. Supersede older sessions of the identity
//! 4. Drain the sink queue to the socket while reading client frames
//! 5. Disconnect when either side stops
//!
//! Client frames for a connection the manager already closed end the read
//! loop instead of being treated as activity.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::application::connections::ConnectionManager;
use crate::domain::connection::TransportKind;
use crate::domain::foundation::ConnectionId;
use crate::ports::ConnectionSink;

use super::messages::{close_code, ClientMessage, ConnectParams, ControlMessage};
use super::routes::{ChannelState, ConnectRejection};
use super::sink::{ChannelSink, Frame};

/// GET /connect/push?identity=..&session=..
pub async fn push_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<ChannelState>,
) -> Response {
    let (sink, rx) = ChannelSink::new(TransportKind::Push, state.sink_capacity);
    let id = match state.connections.establish(
        &params.identity,
        TransportKind::Push,
        &params.session,
        sink.clone(),
    ) {
        Ok(id) => id,
        Err(e) => return ConnectRejection(e).into_response(),
    };

    let connections = state.connections.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, id, params, connections, sink, rx))
}

async fn handle_socket(
    socket: WebSocket,
    id: ConnectionId,
    params: ConnectParams,
    connections: Arc<ConnectionManager>,
    sink: Arc<ChannelSink>,
    mut rx: mpsc::Receiver<Frame>,
) {
    let (mut sender, mut receiver) = socket.split();

    let connected = ControlMessage::connected(id, &params, TransportKind::Push);
    if let Err(e) = send_control(&mut sender, &connected).await {
        debug!(connection_id = %id, error = %e, "Client left before connected frame");
        connections.disconnect(id).await;
        return;
    }

    // The new session is live; older sessions of this identity can go.
    if let Some(record) = connections.connection(id) {
        let superseded = connections
            .supersede_session(&record.identity, &record.session)
            .await;
        if !superseded.is_empty() {
            debug!(connection_id = %id, superseded = superseded.len(), "Older sessions superseded");
        }
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let (message, last) = match frame {
                Frame::Message(text) => (Message::Text(text), false),
                Frame::Keepalive => (Message::Ping(Vec::new()), false),
                Frame::Close(reason) => (
                    Message::Close(Some(CloseFrame {
                        code: close_code(reason),
                        reason: Cow::Owned(reason.to_string()),
                    })),
                    true,
                ),
            };
            if let Err(e) = sender.send(message).await {
                debug!(connection_id = %id, error = %e, "Send error, closing connection");
                break;
            }
            if last {
                break;
            }
        }
    });

    let inbound = connections.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if !record_activity(&inbound, id) {
                        break;
                    }
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::Ping) => {
                            trace!(connection_id = %id, "Received ping");
                            if let Ok(pong) = ControlMessage::pong().to_json() {
                                let _ = sink.send(&pong).await;
                            }
                        }
                        Err(_) => {
                            trace!(connection_id = %id, "Ignoring unrecognised client frame");
                        }
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    if !record_activity(&inbound, id) {
                        break;
                    }
                }
                Ok(Message::Binary(_)) => {
                    warn!(connection_id = %id, "Received unsupported binary message");
                }
                Ok(Message::Close(_)) => {
                    debug!(connection_id = %id, "Client sent close frame");
                    break;
                }
                Err(e) => {
                    debug!(connection_id = %id, error = %e, "Receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // No-op when the manager already removed it.
    connections.disconnect(id).await;
}

/// Touches the connection. `false` once the manager has removed it.
fn record_activity(connections: &ConnectionManager, id: ConnectionId) -> bool {
    if connections.touch(id) {
        return true;
    }
    if connections.was_recently_closed(id) {
        debug!(connection_id = %id, "Client frame after server close, stopping reads");
        return false;
    }
    true
}

async fn send_control(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ControlMessage,
) -> Result<(), axum::Error> {
    let json = message.to_json().map_err(axum::Error::new)?;
    sender.send(Message::Text(json)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn establish(connections: &ConnectionManager, session: &str) -> ConnectionId {
        let (sink, _rx) = ChannelSink::new(TransportKind::Push, 8);
        connections
            .establish("p1", TransportKind::Push, session, sink)
            .unwrap()
    }

    #[tokio::test]
    async fn activity_keeps_live_connection_reading() {
        let connections = ConnectionManager::default();
        let id = establish(&connections, "s1");

        assert!(record_activity(&connections, id));
    }

    #[tokio::test]
    async fn activity_after_server_close_stops_reading() {
        let connections = ConnectionManager::default();
        let id = establish(&connections, "s1");

        assert!(connections.disconnect(id).await);
        assert!(!record_activity(&connections, id));
    }

    #[tokio::test]
    async fn unknown_connection_keeps_reading() {
        let connections = ConnectionManager::default();
        let id = establish(&connections, "s1");
        let stranger = ConnectionId::new();
        assert_ne!(stranger, id);

        assert!(record_activity(&connections, stranger));
    }
}
