//! Events that can occur in a session

use super::state::DenyReason;
use crate::db::Turn;
use crate::llm::LlmErrorKind;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Open events
    Opened {
        turns: Vec<Turn>,
    },
    OpenRejected {
        reason: DenyReason,
    },
    OpenFailed {
        message: String,
    },

    // User events
    UserSubmit {
        text: String,
    },
    Close,

    // Completion events
    CompletionReceived {
        response: String,
    },
    CompletionFailed {
        kind: LlmErrorKind,
        message: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Opened { .. } => "opened",
            Event::OpenRejected { .. } => "open_rejected",
            Event::OpenFailed { .. } => "open_failed",
            Event::UserSubmit { .. } => "user_submit",
            Event::Close => "close",
            Event::CompletionReceived { .. } => "completion_received",
            Event::CompletionFailed { .. } => "completion_failed",
        }
    }
}
