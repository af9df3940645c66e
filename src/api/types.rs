//! API request and response types

use crate::auth::Identity;
use crate::db::{Conversation, ConversationSummary};
use crate::runtime::{RemoveOutcome, SessionTurn};
use crate::state_machine::SessionState;
use serde::{Deserialize, Serialize};

/// Request carrying a user message
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

/// Body of the one-shot endpoint
#[derive(Debug, Deserialize)]
pub struct OneShotRequest {
    pub input: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OneShotResponse {
    pub user_input: String,
    pub result: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: Identity,
}

/// Response with a list of conversations
#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationSummary>,
    pub active: Option<String>,
}

/// Response with a single conversation
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: Conversation,
}

/// An opened conversation with its turns
#[derive(Debug, Serialize)]
pub struct OpenConversationResponse {
    pub conversation: Conversation,
    pub turns: Vec<SessionTurn>,
    pub state: SessionState,
}

#[derive(Debug, Serialize)]
pub struct TurnsResponse {
    pub turns: Vec<SessionTurn>,
    pub state: SessionState,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub turn: SessionTurn,
}

/// Result of starting a conversation with a first message. The
/// conversation exists even when the first completion failed.
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub conversation: Conversation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<SessionTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SelectResponse {
    pub active: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CloseResponse {
    pub closed: bool,
}

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub outcome: RemoveOutcome,
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
