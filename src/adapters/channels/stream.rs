//! Stream channel: server-to-client Server-Sent Events.
//!
//! The first event is `connected`; older sessions are superseded once it
//! has been handed to the response body. A connection the manager already
//! closed skips the greeting and goes straight to its `close` event. Relayed messages follow as
//! `message` events, health probes as comments, and a `close` event ends
//! the stream. A client that goes away drops the body, which disconnects
//! the connection.

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::application::connections::ConnectionManager;
use crate::domain::connection::TransportKind;
use crate::domain::foundation::ConnectionId;

use super::messages::{ConnectParams, ControlMessage};
use super::routes::{ChannelState, ConnectRejection};
use super::sink::{ChannelSink, Frame};

/// GET /connect/stream?identity=..&session=..
pub async fn stream_handler(
    Query(params): Query<ConnectParams>,
    State(state): State<ChannelState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ConnectRejection> {
    let (sink, rx) = ChannelSink::new(TransportKind::Stream, state.sink_capacity);
    let id = state.connections.establish(
        &params.identity,
        TransportKind::Stream,
        &params.session,
        sink,
    )?;

    let greeting = ControlMessage::connected(id, &params, TransportKind::Stream)
        .to_json()
        .unwrap_or_default();

    let body = StreamBody {
        rx,
        phase: Phase::Greeting(greeting),
        guard: DisconnectOnDrop {
            connections: state.connections.clone(),
            id,
        },
    };
    Ok(Sse::new(stream::unfold(body, next_event)))
}

enum Phase {
    Greeting(String),
    Streaming,
    Done,
}

struct StreamBody {
    rx: mpsc::Receiver<Frame>,
    phase: Phase,
    guard: DisconnectOnDrop,
}

async fn next_event(mut body: StreamBody) -> Option<(Result<Event, Infallible>, StreamBody)> {
    match std::mem::replace(&mut body.phase, Phase::Streaming) {
        Phase::Greeting(json) => {
            let id = body.guard.id;
            if !body.guard.connections.was_recently_closed(id) {
                supersede_older_sessions(&body.guard.connections, id).await;
                let event = Event::default().event("connected").data(json);
                return Some((Ok(event), body));
            }
            debug!(connection_id = %id, "Connection closed before greeting");
        }
        Phase::Done => return None,
        Phase::Streaming => {}
    }

    let event = match body.rx.recv().await? {
        Frame::Message(text) => Event::default().event("message").data(text),
        Frame::Keepalive => Event::default().comment("keepalive"),
        Frame::Close(reason) => {
            body.phase = Phase::Done;
            Event::default().event("close").data(reason.to_string())
        }
    };
    Some((Ok(event), body))
}

async fn supersede_older_sessions(connections: &ConnectionManager, id: ConnectionId) {
    if let Some(record) = connections.connection(id) {
        let superseded = connections
            .supersede_session(&record.identity, &record.session)
            .await;
        if !superseded.is_empty() {
            debug!(connection_id = %id, superseded = superseded.len(), "Older sessions superseded");
        }
    }
}

/// Disconnects the connection when the response body is dropped.
struct DisconnectOnDrop {
    connections: Arc<ConnectionManager>,
    id: ConnectionId,
}

impl Drop for DisconnectOnDrop {
    fn drop(&mut self) {
        let connections = self.connections.clone();
        let id = self.id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if connections.disconnect(id).await {
                    debug!(connection_id = %id, "Stream client went away");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::CloseReason;
    use crate::domain::foundation::IdentityId;
    use crate::ports::ConnectionSink;

    fn body(connections: &Arc<ConnectionManager>, session: &str) -> (StreamBody, Arc<ChannelSink>) {
        let (sink, rx) = ChannelSink::new(TransportKind::Stream, 8);
        let id = connections
            .establish("p1", TransportKind::Stream, session, sink.clone())
            .unwrap();
        let body = StreamBody {
            rx,
            phase: Phase::Greeting("{}".to_string()),
            guard: DisconnectOnDrop {
                connections: connections.clone(),
                id,
            },
        };
        (body, sink)
    }

    #[tokio::test]
    async fn greeting_supersedes_then_frames_follow() {
        let connections = Arc::new(ConnectionManager::default());
        let (old, _old_sink) = body(&connections, "s1");
        let (new, sink) = body(&connections, "s2");
        let old_id = old.guard.id;

        let (_, new) = next_event(new).await.unwrap();
        assert!(!connections.was_recently_closed(new.guard.id));
        assert!(connections.was_recently_closed(old_id));

        sink.send("hello").await.unwrap();
        sink.close(CloseReason::Disconnected).await;
        let (_, new) = next_event(new).await.unwrap();
        let (_, new) = next_event(new).await.unwrap();
        assert!(next_event(new).await.is_none());
    }

    #[tokio::test]
    async fn closed_connection_skips_greeting() {
        let connections = Arc::new(ConnectionManager::default());
        let (old, _old_sink) = body(&connections, "s1");
        let (new, _sink) = body(&connections, "s2");
        let old_id = old.guard.id;

        let (_, new) = next_event(new).await.unwrap();
        assert!(connections.was_recently_closed(old_id));

        // The only event left for the superseded body is its close.
        let (_, old) = next_event(old).await.unwrap();
        assert!(matches!(old.phase, Phase::Done));
        assert!(next_event(old).await.is_none());
        assert!(connections.connection(new.guard.id).is_some());
    }

    #[tokio::test]
    async fn dropping_the_body_disconnects() {
        let connections = Arc::new(ConnectionManager::default());
        let (body, _sink) = body(&connections, "s1");
        let p1 = IdentityId::new("p1").unwrap();
        assert_eq!(connections.connections_for(&p1).len(), 1);

        drop(body);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(connections.connections_for(&p1).is_empty());
    }
}
