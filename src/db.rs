//! Database module for Mindline
//!
//! Provides persistence for conversations and turns, plus a change feed
//! that fires on every mutation.

mod schema;

pub use schema::*;

use chrono::{SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;

const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Refusing to store a turn without a response")]
    EmptyResponse,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> DbResult<Self> {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to the change feed
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    fn publish(&self, kind: ChangeKind, conversation_id: &str, owner_id: &str) {
        // No subscribers is not an error
        let _ = self.changes.send(ChangeEvent {
            kind,
            conversation_id: conversation_id.to_string(),
            owner_id: owner_id.to_string(),
        });
    }

    // ==================== Conversation Operations ====================

    /// Create a new conversation
    pub fn create_conversation(&self, id: &str, owner_id: &str) -> DbResult<Conversation> {
        let now = Utc::now().trunc_subsecs(6);
        self.conn().execute(
            "INSERT INTO conversations (id, owner_id, created_at) VALUES (?1, ?2, ?3)",
            params![id, owner_id, format_timestamp(now)],
        )?;

        self.publish(ChangeKind::ConversationCreated, id, owner_id);

        Ok(Conversation {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            created_at: now,
        })
    }

    /// Get conversation by ID
    pub fn get_conversation(&self, id: &str) -> DbResult<Conversation> {
        self.find_conversation(id)?
            .ok_or_else(|| DbError::ConversationNotFound(id.to_string()))
    }

    /// Get conversation by ID, `None` when absent
    pub fn find_conversation(&self, id: &str) -> DbResult<Option<Conversation>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, owner_id, created_at FROM conversations WHERE id = ?1")?;

        let conversation = stmt
            .query_row(params![id], |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    created_at: parse_timestamp(&row.get::<_, String>(2)?),
                })
            })
            .optional()?;
        Ok(conversation)
    }

    /// List an owner's conversations, newest first, annotated with the
    /// earliest turn's input
    pub fn list_conversations(&self, owner_id: &str) -> DbResult<Vec<ConversationSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.created_at,
                    (SELECT t.user_input FROM turns t WHERE t.conversation_id = c.id
                     ORDER BY t.created_at ASC, t.sequence_id ASC LIMIT 1) AS first_input,
                    (SELECT COUNT(*) FROM turns t WHERE t.conversation_id = c.id) AS turn_count
             FROM conversations c
             WHERE c.owner_id = ?1
             ORDER BY c.created_at DESC, c.rowid DESC",
        )?;

        let rows = stmt.query_map(params![owner_id], |row| {
            Ok(ConversationSummary {
                id: row.get(0)?,
                created_at: parse_timestamp(&row.get::<_, String>(1)?),
                first_input: row.get(2)?,
                turn_count: row.get(3)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Delete a conversation record. Its turns must already be gone.
    pub fn delete_conversation(&self, id: &str) -> DbResult<()> {
        let owner_id = {
            let conn = self.conn();
            let owner_id: Option<String> = conn
                .query_row(
                    "SELECT owner_id FROM conversations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(owner_id) = owner_id else {
                return Err(DbError::ConversationNotFound(id.to_string()));
            };

            let deleted = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
            if deleted == 0 {
                return Err(DbError::ConversationNotFound(id.to_string()));
            }
            owner_id
        };

        self.publish(ChangeKind::ConversationDeleted, id, &owner_id);
        Ok(())
    }

    // ==================== Turn Operations ====================

    /// Store a finalized turn
    pub fn add_turn(
        &self,
        turn_id: &str,
        conversation_id: &str,
        user_input: &str,
        bot_response: &str,
    ) -> DbResult<Turn> {
        if bot_response.trim().is_empty() {
            return Err(DbError::EmptyResponse);
        }

        let now = Utc::now().trunc_subsecs(6);
        let (sequence_id, owner_id) = {
            let conn = self.conn();
            let owner_id: Option<String> = conn
                .query_row(
                    "SELECT owner_id FROM conversations WHERE id = ?1",
                    params![conversation_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(owner_id) = owner_id else {
                return Err(DbError::ConversationNotFound(conversation_id.to_string()));
            };

            let sequence_id: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM turns WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;

            conn.execute(
                "INSERT INTO turns (id, conversation_id, sequence_id, user_input, bot_response, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    turn_id,
                    conversation_id,
                    sequence_id,
                    user_input,
                    bot_response,
                    format_timestamp(now),
                ],
            )?;
            (sequence_id, owner_id)
        };

        self.publish(ChangeKind::TurnAdded, conversation_id, &owner_id);

        Ok(Turn {
            id: turn_id.to_string(),
            conversation_id: conversation_id.to_string(),
            sequence_id,
            user_input: user_input.to_string(),
            bot_response: bot_response.to_string(),
            created_at: now,
        })
    }

    /// Get turns for a conversation in chronological order
    pub fn get_turns(&self, conversation_id: &str) -> DbResult<Vec<Turn>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, sequence_id, user_input, bot_response, created_at
             FROM turns WHERE conversation_id = ?1
             ORDER BY created_at ASC, sequence_id ASC",
        )?;

        let rows = stmt.query_map(params![conversation_id], parse_turn_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Delete every turn of a conversation, returning how many were removed
    pub fn delete_turns(&self, conversation_id: &str) -> DbResult<usize> {
        let (deleted, owner_id) = {
            let conn = self.conn();
            let owner_id: Option<String> = conn
                .query_row(
                    "SELECT owner_id FROM conversations WHERE id = ?1",
                    params![conversation_id],
                    |row| row.get(0),
                )
                .optional()?;
            let deleted = conn.execute(
                "DELETE FROM turns WHERE conversation_id = ?1",
                params![conversation_id],
            )?;
            (deleted, owner_id)
        };

        if deleted > 0 {
            if let Some(owner_id) = owner_id {
                self.publish(ChangeKind::TurnsDeleted, conversation_id, &owner_id);
            }
        }
        Ok(deleted)
    }
}

fn parse_turn_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Turn> {
    Ok(Turn {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sequence_id: row.get(2)?,
        user_input: row.get(3)?,
        bot_response: row.get(4)?,
        created_at: parse_timestamp(&row.get::<_, String>(5)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get_conversation() {
        let db = Database::open_in_memory().unwrap();

        let conv = db.create_conversation("conv-1", "alice").unwrap();
        assert_eq!(conv.id, "conv-1");
        assert_eq!(conv.owner_id, "alice");

        let fetched = db.get_conversation("conv-1").unwrap();
        assert_eq!(fetched, conv);

        assert!(matches!(
            db.get_conversation("missing"),
            Err(DbError::ConversationNotFound(_))
        ));
        assert!(db.find_conversation("missing").unwrap().is_none());
    }

    #[test]
    fn test_add_and_get_turns() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("conv-1", "alice").unwrap();

        let t1 = db.add_turn("t-1", "conv-1", "I feel low", "I'm here with you.").unwrap();
        let t2 = db.add_turn("t-2", "conv-1", "Thanks", "Any time.").unwrap();
        assert_eq!(t1.sequence_id, 1);
        assert_eq!(t2.sequence_id, 2);

        let turns = db.get_turns("conv-1").unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].user_input, "I feel low");
        assert_eq!(turns[1].bot_response, "Any time.");
    }

    #[test]
    fn test_turn_without_response_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("conv-1", "alice").unwrap();

        assert!(matches!(
            db.add_turn("t-1", "conv-1", "hello", "   "),
            Err(DbError::EmptyResponse)
        ));
        assert!(db.get_turns("conv-1").unwrap().is_empty());
    }

    #[test]
    fn test_turn_for_missing_conversation_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.add_turn("t-1", "nope", "hello", "hi"),
            Err(DbError::ConversationNotFound(_))
        ));
    }

    #[test]
    fn test_list_is_scoped_to_owner_and_newest_first() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("a-1", "alice").unwrap();
        db.create_conversation("b-1", "bob").unwrap();
        db.create_conversation("a-2", "alice").unwrap();
        db.add_turn("t-1", "a-1", "first words", "reply").unwrap();
        db.add_turn("t-2", "a-1", "second words", "reply").unwrap();

        let list = db.list_conversations("alice").unwrap();
        let ids: Vec<_> = list.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a-2", "a-1"]);
        assert_eq!(list[0].first_input, None);
        assert_eq!(list[0].turn_count, 0);
        assert_eq!(list[1].first_input.as_deref(), Some("first words"));
        assert_eq!(list[1].turn_count, 2);
    }

    #[test]
    fn test_conversation_with_turns_cannot_be_deleted_first() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("conv-1", "alice").unwrap();
        db.add_turn("t-1", "conv-1", "hello", "hi").unwrap();

        assert!(matches!(
            db.delete_conversation("conv-1"),
            Err(DbError::Sqlite(_))
        ));

        assert_eq!(db.delete_turns("conv-1").unwrap(), 1);
        db.delete_conversation("conv-1").unwrap();
        assert!(db.find_conversation("conv-1").unwrap().is_none());
        assert!(matches!(
            db.delete_conversation("conv-1"),
            Err(DbError::ConversationNotFound(_))
        ));
    }

    #[test]
    fn test_change_feed_reports_mutations() {
        let db = Database::open_in_memory().unwrap();
        let mut rx = db.subscribe();

        db.create_conversation("conv-1", "alice").unwrap();
        db.add_turn("t-1", "conv-1", "hello", "hi").unwrap();
        db.delete_turns("conv-1").unwrap();
        db.delete_conversation("conv-1").unwrap();

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| {
                assert_eq!(e.owner_id, "alice");
                e.kind
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ChangeKind::ConversationCreated,
                ChangeKind::TurnAdded,
                ChangeKind::TurnsDeleted,
                ChangeKind::ConversationDeleted,
            ]
        );
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mindline.db");
        {
            let db = Database::open(&path).unwrap();
            db.create_conversation("conv-1", "alice").unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_conversation("conv-1").unwrap().owner_id, "alice");
    }
}
