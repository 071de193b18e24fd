//! Broker client errors.

use std::time::Duration;
use thiserror::Error;

use crate::adapters::resilience::Retryable;
use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId};
use crate::domain::subject::SubjectError;
use crate::ports::{DeadLetterError, TransportError};

/// Errors from publishing or subscribing through the broker client.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Subject or pattern validation failed. Never retried.
    #[error(transparent)]
    Subject(#[from] SubjectError),

    #[error("Circuit open for {operation}")]
    CircuitOpen {
        operation: String,
        retry_after: Option<Duration>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Message serialization failed: {0}")]
    Serialization(String),

    #[error("Dead letter store error: {0}")]
    DeadLetter(#[from] DeadLetterError),

    #[error("Broker operation cancelled by shutdown")]
    Cancelled,

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),

    #[error("Broker client is shut down")]
    ShutDown,
}

impl Retryable for BrokerError {
    fn is_retryable(&self) -> bool {
        match self {
            BrokerError::CircuitOpen { .. } => true,
            BrokerError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

impl From<BrokerError> for DomainError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Subject(e) => e.into(),
            BrokerError::CircuitOpen { .. } => {
                DomainError::new(ErrorCode::CircuitOpen, err.to_string())
            }
            BrokerError::Transport(_) | BrokerError::Cancelled | BrokerError::ShutDown => {
                DomainError::new(ErrorCode::BrokerUnavailable, err.to_string())
            }
            BrokerError::DeadLetter(_) => DomainError::new(ErrorCode::StorageError, err.to_string()),
            BrokerError::Serialization(_) | BrokerError::SubscriptionNotFound(_) => {
                DomainError::new(ErrorCode::InternalError, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_retryable() {
        let err = BrokerError::from(SubjectError::UnknownPattern("x".into()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn circuit_open_is_retryable() {
        let err = BrokerError::CircuitOpen {
            operation: "broker.publish".into(),
            retry_after: None,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn transport_retryability_is_preserved() {
        assert!(BrokerError::from(TransportError::Unavailable("down".into())).is_retryable());
        assert!(!BrokerError::from(TransportError::Closed).is_retryable());
    }

    #[test]
    fn maps_to_domain_codes() {
        let err: DomainError = BrokerError::from(TransportError::Closed).into();
        assert_eq!(err.code, ErrorCode::BrokerUnavailable);

        let err: DomainError = BrokerError::from(SubjectError::UnknownPattern("x".into())).into();
        assert_eq!(err.code, ErrorCode::UnknownPattern);
    }
}
