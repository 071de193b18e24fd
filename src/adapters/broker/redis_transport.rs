//! Redis pub/sub transport for multi-instance deployments.
//!
//! Publishing goes over one shared multiplexed connection. Each
//! subscription opens its own pub/sub connection and issues `PSUBSCRIBE`
//! with the filter rendered as a Redis glob. Redis globs let `*` cross
//! segment boundaries, so every inbound message is re-checked against the
//! subject filter before it is yielded.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::domain::subject::{Subject, SubjectFilter};
use crate::ports::{InboundMessage, InboundStream, PubSubTransport, TransportError};

/// Redis-backed transport.
#[derive(Clone)]
pub struct RedisTransport {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisTransport {
    /// Create a transport from an open client and publish connection.
    pub fn new(client: redis::Client, conn: MultiplexedConnection) -> Self {
        Self { client, conn }
    }

    /// Open a client and its multiplexed publish connection.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        tracing::info!("Connected to Redis broker");
        Ok(Self::new(client, conn))
    }
}

fn unavailable(err: redis::RedisError) -> TransportError {
    TransportError::Unavailable(err.to_string())
}

/// Converts a raw pub/sub delivery, dropping channels that are not valid
/// subjects or that the glob selected but the filter does not.
fn to_inbound(filter: &SubjectFilter, channel: &str, payload: &[u8]) -> Option<InboundMessage> {
    let subject = match Subject::parse(channel) {
        Ok(subject) => subject,
        Err(e) => {
            tracing::debug!(channel, error = %e, "Ignoring message on non-subject channel");
            return None;
        }
    };
    if !filter.matches(&subject) {
        return None;
    }
    Some(InboundMessage {
        subject,
        payload: payload.to_vec(),
    })
}

#[async_trait]
impl PubSubTransport for RedisTransport {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, subject: &Subject, payload: &[u8]) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn
            .publish(subject.as_str(), payload)
            .await
            .map_err(unavailable)?;
        tracing::trace!(subject = %subject, receivers, "Published to Redis");
        Ok(())
    }

    async fn subscribe(&self, filter: &SubjectFilter) -> Result<InboundStream, TransportError> {
        let mut pubsub = self
            .client
            .get_async_connection()
            .await
            .map_err(unavailable)?
            .into_pubsub();
        let glob = filter.to_redis_glob();
        pubsub.psubscribe(&glob).await.map_err(unavailable)?;
        tracing::debug!(pattern = %filter, glob = %glob, "Redis subscription acknowledged");

        let filter = filter.clone();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let inbound = to_inbound(&filter, msg.get_channel_name(), msg.get_payload_bytes());
            futures::future::ready(inbound)
        });
        Ok(stream.boxed())
    }
}
