//! Session state types

use serde::{Deserialize, Serialize};

/// Why a session could not be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    AccessDenied,
    NotFound,
}

/// Lifecycle of one conversation session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionState {
    /// Created, turns not loaded yet
    #[default]
    Uninitialized,

    /// Turns loaded, accepting input
    Ready,

    /// One completion request in flight for `input`
    AwaitingCompletion { input: String },

    /// Open was refused (terminal)
    Denied { reason: DenyReason },

    /// Open failed on a store error (terminal)
    Failed { message: String },

    /// Session discarded. `in_flight` holds the input of a completion that
    /// was still outstanding when the session closed.
    Closed {
        #[serde(skip)]
        in_flight: Option<String>,
    },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Ready => "ready",
            SessionState::AwaitingCompletion { .. } => "awaiting_completion",
            SessionState::Denied { .. } => "denied",
            SessionState::Failed { .. } => "failed",
            SessionState::Closed { .. } => "closed",
        }
    }

    /// Terminal states never leave, except to `Closed`
    #[allow(dead_code)] // Used in tests
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Denied { .. } | SessionState::Failed { .. } | SessionState::Closed { .. }
        )
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, SessionState::AwaitingCompletion { .. })
    }
}

/// Static facts about the session, passed to every transition
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub conversation_id: String,
    pub user_id: String,
}

impl SessionContext {
    pub fn new(conversation_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
        }
    }
}
