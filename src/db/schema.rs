//! Database schema and record types

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL schema for initialization
///
/// Turns reference their conversation without `ON DELETE CASCADE`: with
/// foreign keys enabled, a conversation can only be deleted once its turns
/// are gone.
pub const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_owner ON conversations(owner_id, created_at DESC);

CREATE TABLE IF NOT EXISTS turns (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    user_input TEXT NOT NULL,
    bot_response TEXT NOT NULL CHECK (length(trim(bot_response)) > 0),
    created_at TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
);

CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(conversation_id, sequence_id);
";

/// Conversation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation as shown in a user's conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Input text of the earliest turn, if any turn exists
    pub first_input: Option<String>,
    pub turn_count: i64,
}

/// A finalized (durable) turn. Both texts are always populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub conversation_id: String,
    pub sequence_id: i64,
    pub user_input: String,
    pub bot_response: String,
    pub created_at: DateTime<Utc>,
}

/// Kind of mutation reported on the change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    ConversationCreated,
    ConversationDeleted,
    TurnAdded,
    TurnsDeleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::ConversationCreated => write!(f, "conversation_created"),
            ChangeKind::ConversationDeleted => write!(f, "conversation_deleted"),
            ChangeKind::TurnAdded => write!(f, "turn_added"),
            ChangeKind::TurnsDeleted => write!(f, "turns_deleted"),
        }
    }
}

/// A change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub conversation_id: String,
    pub owner_id: String,
}

/// Fixed-width RFC 3339 so that string order equals time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
