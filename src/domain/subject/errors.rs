//! Subject pattern errors.

use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode};

/// Errors from the subject pattern registry.
///
/// All of these are validation failures: they are rejected synchronously
/// and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubjectError {
    #[error("Unknown subject pattern '{0}'")]
    UnknownPattern(String),

    #[error("Subject pattern '{0}' is already registered")]
    DuplicatePattern(String),

    #[error("Pattern '{pattern}' is missing required parameter '{param}'")]
    MissingParameter { pattern: String, param: String },

    #[error("Pattern '{pattern}' does not accept parameter '{param}'")]
    UnexpectedParameter { pattern: String, param: String },

    #[error("Parameter '{param}' has invalid value '{value}': {reason}")]
    InvalidParameter {
        param: String,
        value: String,
        reason: String,
    },

    #[error("Invalid subject template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Template placeholders {placeholders:?} do not match required parameters {required:?}")]
    ParameterMismatch {
        placeholders: Vec<String>,
        required: Vec<String>,
    },

    #[error("Pattern '{0}' has been published against and cannot be removed")]
    PatternInUse(String),

    #[error("Invalid subject '{subject}': {reason}")]
    InvalidSubject { subject: String, reason: String },

    #[error("Subject '{0}' does not match any registered pattern")]
    Unregistered(String),

    #[error("Subscription pattern '{pattern}' is too broad: {reason}")]
    SubscriptionTooBroad { pattern: String, reason: String },
}

impl SubjectError {
    pub(crate) fn invalid_subject(subject: &str, reason: impl Into<String>) -> Self {
        SubjectError::InvalidSubject {
            subject: subject.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_template(template: &str, reason: impl Into<String>) -> Self {
        SubjectError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<SubjectError> for DomainError {
    fn from(err: SubjectError) -> Self {
        let code = match &err {
            SubjectError::UnknownPattern(_) => ErrorCode::UnknownPattern,
            SubjectError::InvalidSubject { .. }
            | SubjectError::Unregistered(_)
            | SubjectError::SubscriptionTooBroad { .. } => ErrorCode::InvalidSubject,
            _ => ErrorCode::ValidationFailed,
        };
        DomainError::new(code, err.to_string())
    }
}
