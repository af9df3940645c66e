//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use crate::db::{ChangeEvent, ChangeKind, Conversation, ConversationSummary, Turn};
use crate::llm::{LlmError, LlmRequest, LlmResponse, Usage};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

// ============================================================================
// Mock Completion Client
// ============================================================================

/// Mock completion client that returns queued responses
pub struct MockCompletionClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockCompletionClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_text(&self, text: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Ok(LlmResponse {
            text: text.into(),
            usage: Usage::default(),
        }));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.next(request)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Delayed Mock Completion Client (for busy and timeout testing)
// ============================================================================

/// Mock completion client with configurable delay
pub struct DelayedMockCompletionClient {
    inner: MockCompletionClient,
    delay: Duration,
    /// Notified when request starts (for test synchronization)
    pub request_started: Arc<Notify>,
}

impl DelayedMockCompletionClient {
    pub fn new(model_id: impl Into<String>, delay: Duration) -> Self {
        Self {
            inner: MockCompletionClient::new(model_id),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_text(&self, text: impl Into<String>) {
        self.inner.queue_text(text);
    }
}

#[async_trait]
impl CompletionClient for DelayedMockCompletionClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.request_started.notify_waiters();
        tokio::time::sleep(self.delay).await;
        self.inner.next(request)
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// In-memory store with a change feed and injectable failures
pub struct InMemoryStorage {
    conversations: Mutex<Vec<Conversation>>,
    turns: Mutex<Vec<Turn>>,
    changes: broadcast::Sender<ChangeEvent>,
    failing_turn_inserts: AtomicU32,
    failing_reads: AtomicBool,
    next_id: AtomicU32,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            conversations: Mutex::new(Vec::new()),
            turns: Mutex::new(Vec::new()),
            changes,
            failing_turn_inserts: AtomicU32::new(0),
            failing_reads: AtomicBool::new(false),
            next_id: AtomicU32::new(1),
        }
    }

    /// Make the next `count` turn inserts fail
    pub fn fail_next_turn_inserts(&self, count: u32) {
        self.failing_turn_inserts.store(count, Ordering::SeqCst);
    }

    /// Make every read fail until switched off
    pub fn set_failing_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn publish(&self, kind: ChangeKind, conversation_id: &str, owner_id: &str) {
        let _ = self.changes.send(ChangeEvent {
            kind,
            conversation_id: conversation_id.to_string(),
            owner_id: owner_id.to_string(),
        });
    }

    fn owner_of(&self, conv_id: &str) -> Option<String> {
        self.conversations
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == conv_id)
            .map(|c| c.owner_id.clone())
    }

    fn check_reads(&self) -> Result<(), String> {
        if self.failing_reads.load(Ordering::SeqCst) {
            Err("simulated read failure".to_string())
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStorage {
    async fn insert_conversation(&self, owner_id: &str) -> Result<Conversation, String> {
        let conversation = Conversation {
            id: self.next_id("conv"),
            owner_id: owner_id.to_string(),
            created_at: Utc::now(),
        };
        self.conversations.lock().unwrap().push(conversation.clone());
        self.publish(ChangeKind::ConversationCreated, &conversation.id, owner_id);
        Ok(conversation)
    }

    async fn conversations_by_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<ConversationSummary>, String> {
        self.check_reads()?;
        let turns = self.turns.lock().unwrap();
        // Insertion order is creation order; newest first
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|c| c.owner_id == owner_id)
            .map(|c| {
                let own: Vec<&Turn> = turns.iter().filter(|t| t.conversation_id == c.id).collect();
                ConversationSummary {
                    id: c.id.clone(),
                    created_at: c.created_at,
                    first_input: own.first().map(|t| t.user_input.clone()),
                    turn_count: i64::try_from(own.len()).unwrap_or(i64::MAX),
                }
            })
            .collect())
    }

    async fn conversation_by_id(&self, conv_id: &str) -> Result<Option<Conversation>, String> {
        self.check_reads()?;
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == conv_id)
            .cloned())
    }

    async fn delete_conversation(&self, conv_id: &str) -> Result<bool, String> {
        if self.turns.lock().unwrap().iter().any(|t| t.conversation_id == conv_id) {
            return Err("conversation still has turns".to_string());
        }
        let removed = {
            let mut conversations = self.conversations.lock().unwrap();
            let index = conversations.iter().position(|c| c.id == conv_id);
            index.map(|i| conversations.remove(i))
        };
        match removed {
            Some(c) => {
                self.publish(ChangeKind::ConversationDeleted, conv_id, &c.owner_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl TurnStore for InMemoryStorage {
    async fn insert_turn(
        &self,
        conv_id: &str,
        input: &str,
        response: &str,
    ) -> Result<Turn, String> {
        let failing = self.failing_turn_inserts.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_turn_inserts.store(failing - 1, Ordering::SeqCst);
            return Err("simulated write failure".to_string());
        }
        if response.trim().is_empty() {
            return Err("empty response".to_string());
        }
        let owner = self
            .owner_of(conv_id)
            .ok_or_else(|| format!("Conversation not found: {conv_id}"))?;

        let turn = {
            let mut turns = self.turns.lock().unwrap();
            let count = turns.iter().filter(|t| t.conversation_id == conv_id).count();
            let sequence_id = i64::try_from(count).unwrap_or(i64::MAX) + 1;
            let turn = Turn {
                id: self.next_id("turn"),
                conversation_id: conv_id.to_string(),
                sequence_id,
                user_input: input.to_string(),
                bot_response: response.to_string(),
                created_at: Utc::now(),
            };
            turns.push(turn.clone());
            turn
        };
        self.publish(ChangeKind::TurnAdded, conv_id, &owner);
        Ok(turn)
    }

    async fn turns_by_conversation(&self, conv_id: &str) -> Result<Vec<Turn>, String> {
        self.check_reads()?;
        Ok(self
            .turns
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.conversation_id == conv_id)
            .cloned()
            .collect())
    }

    async fn delete_turns_by_conversation(&self, conv_id: &str) -> Result<usize, String> {
        let removed = {
            let mut turns = self.turns.lock().unwrap();
            let before = turns.len();
            turns.retain(|t| t.conversation_id != conv_id);
            before - turns.len()
        };
        if removed > 0 {
            if let Some(owner) = self.owner_of(conv_id) {
                self.publish(ChangeKind::TurnsDeleted, conv_id, &owner);
            }
        }
        Ok(removed)
    }
}

impl ChangeFeed for InMemoryStorage {
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
