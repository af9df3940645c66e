//! Trait abstractions for runtime I/O
//!
//! These traits let the session controller and navigator run against mock
//! implementations in tests.

use crate::db::{ChangeEvent, Conversation, ConversationSummary, Database, DbError, Turn};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Storage for conversation records
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert a new, empty conversation
    async fn insert_conversation(&self, owner_id: &str) -> Result<Conversation, String>;

    /// All conversations of an owner, newest first
    async fn conversations_by_owner(&self, owner_id: &str)
        -> Result<Vec<ConversationSummary>, String>;

    /// Look a conversation up; `Ok(None)` when it does not exist
    async fn conversation_by_id(&self, conv_id: &str) -> Result<Option<Conversation>, String>;

    /// Delete a conversation record. Returns `false` when it was already gone.
    async fn delete_conversation(&self, conv_id: &str) -> Result<bool, String>;
}

/// Storage for finalized turns
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// Write a finalized turn
    async fn insert_turn(&self, conv_id: &str, input: &str, response: &str)
        -> Result<Turn, String>;

    /// Turns of a conversation, oldest first
    async fn turns_by_conversation(&self, conv_id: &str) -> Result<Vec<Turn>, String>;

    /// Delete every turn of a conversation
    async fn delete_turns_by_conversation(&self, conv_id: &str) -> Result<usize, String>;
}

/// Push notification of store mutations
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Client for completion requests
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Complete a request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Combined storage trait for convenience
pub trait Storage: ConversationStore + TurnStore + ChangeFeed {}
impl<T: ConversationStore + TurnStore + ChangeFeed> Storage for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn insert_conversation(&self, owner_id: &str) -> Result<Conversation, String> {
        (**self).insert_conversation(owner_id).await
    }

    async fn conversations_by_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<ConversationSummary>, String> {
        (**self).conversations_by_owner(owner_id).await
    }

    async fn conversation_by_id(&self, conv_id: &str) -> Result<Option<Conversation>, String> {
        (**self).conversation_by_id(conv_id).await
    }

    async fn delete_conversation(&self, conv_id: &str) -> Result<bool, String> {
        (**self).delete_conversation(conv_id).await
    }
}

#[async_trait]
impl<T: TurnStore + ?Sized> TurnStore for Arc<T> {
    async fn insert_turn(
        &self,
        conv_id: &str,
        input: &str,
        response: &str,
    ) -> Result<Turn, String> {
        (**self).insert_turn(conv_id, input, response).await
    }

    async fn turns_by_conversation(&self, conv_id: &str) -> Result<Vec<Turn>, String> {
        (**self).turns_by_conversation(conv_id).await
    }

    async fn delete_turns_by_conversation(&self, conv_id: &str) -> Result<usize, String> {
        (**self).delete_turns_by_conversation(conv_id).await
    }
}

impl<T: ChangeFeed + ?Sized> ChangeFeed for Arc<T> {
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        (**self).subscribe()
    }
}

#[async_trait]
impl<T: CompletionClient + ?Sized> CompletionClient for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationStore for DatabaseStorage {
    async fn insert_conversation(&self, owner_id: &str) -> Result<Conversation, String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.db
            .create_conversation(&id, owner_id)
            .map_err(|e| e.to_string())
    }

    async fn conversations_by_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<ConversationSummary>, String> {
        self.db.list_conversations(owner_id).map_err(|e| e.to_string())
    }

    async fn conversation_by_id(&self, conv_id: &str) -> Result<Option<Conversation>, String> {
        match self.db.get_conversation(conv_id) {
            Ok(conversation) => Ok(Some(conversation)),
            Err(DbError::ConversationNotFound(_)) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn delete_conversation(&self, conv_id: &str) -> Result<bool, String> {
        match self.db.delete_conversation(conv_id) {
            Ok(()) => Ok(true),
            Err(DbError::ConversationNotFound(_)) => Ok(false),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[async_trait]
impl TurnStore for DatabaseStorage {
    async fn insert_turn(
        &self,
        conv_id: &str,
        input: &str,
        response: &str,
    ) -> Result<Turn, String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.db
            .add_turn(&id, conv_id, input, response)
            .map_err(|e| e.to_string())
    }

    async fn turns_by_conversation(&self, conv_id: &str) -> Result<Vec<Turn>, String> {
        self.db.get_turns(conv_id).map_err(|e| e.to_string())
    }

    async fn delete_turns_by_conversation(&self, conv_id: &str) -> Result<usize, String> {
        self.db.delete_turns(conv_id).map_err(|e| e.to_string())
    }
}

impl ChangeFeed for DatabaseStorage {
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.db.subscribe()
    }
}

/// Adapter to use an optional `LlmService` as `CompletionClient`
pub struct ServiceCompletionClient {
    service: Option<Arc<dyn LlmService>>,
    model_id: String,
}

impl ServiceCompletionClient {
    pub fn new(service: Option<Arc<dyn LlmService>>) -> Self {
        let model_id = service
            .as_ref()
            .map_or_else(|| "unconfigured".to_string(), |s| s.model_id().to_string());
        Self { service, model_id }
    }
}

#[async_trait]
impl CompletionClient for ServiceCompletionClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let service = self.service.as_ref().ok_or_else(|| {
            LlmError::auth("No completion provider configured (set GEMINI_API_KEY or LLM_GATEWAY)")
        })?;
        service.complete(request).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
