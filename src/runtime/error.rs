//! Errors surfaced by sessions and the navigator

use crate::llm::{LlmError, LlmErrorKind};
use crate::state_machine::{DenyReason, TransitionError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("You do not have access to this conversation")]
    AccessDenied,
    #[error("Conversation not found")]
    NotFound,
    #[error("A response is still being generated for this conversation")]
    Busy,
    #[error("Message must not be empty")]
    ValidationFailed,
    #[error("Session is not ready: {0}")]
    NotReady(String),
    #[error("Completion failed: {message}")]
    CompletionFailed { kind: LlmErrorKind, message: String },
    #[error("Could not save: {0}")]
    PersistenceFailed(String),
}

impl SessionError {
    /// Timeouts are the one completion failure with their own status
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SessionError::CompletionFailed {
                kind: LlmErrorKind::Timeout,
                ..
            }
        )
    }
}

impl From<TransitionError> for SessionError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::Busy => SessionError::Busy,
            TransitionError::EmptyInput => SessionError::ValidationFailed,
            TransitionError::NotReady => SessionError::NotReady("session is not open".to_string()),
            TransitionError::InvalidTransition(msg) => SessionError::NotReady(msg),
        }
    }
}

impl From<DenyReason> for SessionError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::AccessDenied => SessionError::AccessDenied,
            DenyReason::NotFound => SessionError::NotFound,
        }
    }
}

impl From<LlmError> for SessionError {
    fn from(e: LlmError) -> Self {
        SessionError::CompletionFailed {
            kind: e.kind,
            message: e.message,
        }
    }
}
