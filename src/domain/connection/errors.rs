//! Connection establishment errors.

use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, ValidationError};

/// Which ceiling rejected a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityLimit {
    /// Process-wide connection ceiling.
    Total,
    /// Per-identity connection ceiling.
    PerIdentity,
}

impl std::fmt::Display for CapacityLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityLimit::Total => write!(f, "total"),
            CapacityLimit::PerIdentity => write!(f, "per-identity"),
        }
    }
}

/// Errors returned by `ConnectionManager::establish`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Invalid identity: {0}")]
    IdentityInvalid(ValidationError),

    #[error("Invalid session: {0}")]
    SessionInvalid(ValidationError),

    #[error("Connection capacity exceeded ({limit} limit of {max})")]
    CapacityExceeded { limit: CapacityLimit, max: usize },

    #[error("Connection manager is shutting down")]
    ShuttingDown,
}

impl From<ConnectionError> for DomainError {
    fn from(err: ConnectionError) -> Self {
        let code = match &err {
            ConnectionError::IdentityInvalid(_) | ConnectionError::SessionInvalid(_) => {
                ErrorCode::ValidationFailed
            }
            ConnectionError::CapacityExceeded { .. } | ConnectionError::ShuttingDown => {
                ErrorCode::CapacityExceeded
            }
        };
        DomainError::new(code, err.to_string())
    }
}
