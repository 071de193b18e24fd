//! Bounded-channel sink shared by the push and stream transports.
//!
//! The connection manager writes frames into an mpsc queue; the socket task
//! owning the receiver drains it onto the wire. Sends never wait: a full
//! queue is reported as backpressure, a dropped receiver as closed.

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use std::sync::Arc;

use crate::domain::connection::{CloseReason, TransportKind};
use crate::ports::{ConnectionSink, SinkError};

/// One item queued for a socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A serialized outbound message.
    Message(String),
    /// Health probe; WebSocket ping or SSE comment.
    Keepalive,
    /// Last frame; the socket task closes after writing it.
    Close(CloseReason),
}

/// [`ConnectionSink`] backed by a bounded mpsc queue.
#[derive(Debug)]
pub struct ChannelSink {
    transport: TransportKind,
    tx: mpsc::Sender<Frame>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its socket task drains.
    pub fn new(transport: TransportKind, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self { transport, tx }), rx)
    }

    fn enqueue(&self, frame: Frame) -> Result<(), SinkError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Backpressure,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

#[async_trait]
impl ConnectionSink for ChannelSink {
    fn transport(&self) -> TransportKind {
        self.transport
    }

    async fn send(&self, frame: &str) -> Result<(), SinkError> {
        self.enqueue(Frame::Message(frame.to_string()))
    }

    async fn probe(&self) -> Result<(), SinkError> {
        self.enqueue(Frame::Keepalive)
    }

    async fn close(&self, reason: CloseReason) {
        // Best effort: dropping the last sender ends the socket task anyway.
        let _ = self.enqueue(Frame::Close(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (sink, mut rx) = ChannelSink::new(TransportKind::Push, 8);
        sink.send("one").await.unwrap();
        sink.probe().await.unwrap();
        sink.send("two").await.unwrap();
        sink.close(CloseReason::Superseded).await;

        assert_eq!(rx.recv().await, Some(Frame::Message("one".to_string())));
        assert_eq!(rx.recv().await, Some(Frame::Keepalive));
        assert_eq!(rx.recv().await, Some(Frame::Message("two".to_string())));
        assert_eq!(rx.recv().await, Some(Frame::Close(CloseReason::Superseded)));
    }

    #[tokio::test]
    async fn full_queue_is_backpressure() {
        let (sink, _rx) = ChannelSink::new(TransportKind::Stream, 1);
        sink.send("one").await.unwrap();
        assert_eq!(sink.send("two").await, Err(SinkError::Backpressure));
        assert_eq!(sink.probe().await, Err(SinkError::Backpressure));
    }

    #[tokio::test]
    async fn dropped_receiver_is_closed() {
        let (sink, rx) = ChannelSink::new(TransportKind::Stream, 4);
        drop(rx);
        assert_eq!(sink.send("one").await, Err(SinkError::Closed));
        sink.close(CloseReason::Shutdown).await;
        assert_eq!(sink.transport(), TransportKind::Stream);
    }
}
