//! DeliveryRelay - Broker subscription handler that delivers to connections.
//!
//! Inbound broker messages carry their target identities. The relay fans
//! each one out through `ConnectionManager::broadcast`; partial delivery is
//! logged, never raised, so one unreachable player cannot fail the message.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::connections::ConnectionManager;
use crate::domain::connection::OutboundMessage;
use crate::domain::foundation::DomainError;
use crate::ports::{BrokerMessage, MessageHandler};

/// Delivers broker messages to the live connections of their targets.
pub struct DeliveryRelay {
    connections: Arc<ConnectionManager>,
}

impl DeliveryRelay {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }
}

fn to_outbound(message: &BrokerMessage) -> OutboundMessage {
    OutboundMessage {
        message_id: message.message_id.clone(),
        event_type: message.event_type.clone(),
        payload: message.payload.clone(),
        created_at: message.published_at,
        correlation_id: message.metadata.correlation_id.clone(),
    }
}

#[async_trait]
impl MessageHandler for DeliveryRelay {
    async fn handle(&self, message: BrokerMessage) -> Result<(), DomainError> {
        if message.targets.is_empty() {
            debug!(subject = %message.subject, message_id = %message.message_id, "Broker message has no targets");
            return Ok(());
        }

        let outbound = to_outbound(&message);
        let report = self.connections.broadcast(&message.targets, &outbound).await;

        if report.total_failed() > 0 {
            warn!(
                subject = %message.subject,
                message_id = %message.message_id,
                delivered = report.total_delivered(),
                failed = report.total_failed(),
                "Partial delivery"
            );
        } else {
            debug!(
                subject = %message.subject,
                message_id = %message.message_id,
                delivered = report.total_delivered(),
                unreachable = report.unreachable().len(),
                "Delivered broker message"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DeliveryRelay"
    }
}
