//! Multi-conversation navigator
//!
//! Keeps one user's conversation list and the active-conversation pointer.
//! The list is always replaced wholesale, so duplicate refreshes from local
//! mutations and from the change feed are harmless.

use super::error::SessionError;
use super::traits::Storage;
use crate::auth::authorize;
use crate::db::{Conversation, ConversationSummary};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoveOutcome {
    Removed,
    /// Someone else got there first
    AlreadyAbsent,
}

pub struct Navigator<S: Storage> {
    owner_id: String,
    storage: S,
    active: Mutex<Option<String>>,
    list_tx: watch::Sender<Vec<ConversationSummary>>,
}

impl<S: Storage + 'static> Navigator<S> {
    pub fn new(owner_id: impl Into<String>, storage: S) -> Self {
        let (list_tx, _) = watch::channel(Vec::new());
        Self {
            owner_id: owner_id.into(),
            storage,
            active: Mutex::new(None),
            list_tx,
        }
    }

    fn active_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch the owner's conversations, newest first, and publish them
    pub async fn list(&self) -> Result<Vec<ConversationSummary>, SessionError> {
        let list = self
            .storage
            .conversations_by_owner(&self.owner_id)
            .await
            .map_err(SessionError::PersistenceFailed)?;
        self.list_tx.send_replace(list.clone());
        Ok(list)
    }

    /// The last fetched list, without touching the store
    #[allow(dead_code)] // Used in tests
    pub fn cached(&self) -> Vec<ConversationSummary> {
        self.list_tx.borrow().clone()
    }

    /// Number of live list receivers (open SSE streams)
    pub fn subscriber_count(&self) -> usize {
        self.list_tx.receiver_count()
    }

    /// Receiver that sees every published list
    pub fn subscribe(&self) -> watch::Receiver<Vec<ConversationSummary>> {
        self.list_tx.subscribe()
    }

    /// Create an empty conversation and make it active
    pub async fn create(&self) -> Result<Conversation, SessionError> {
        let conversation = self
            .storage
            .insert_conversation(&self.owner_id)
            .await
            .map_err(SessionError::PersistenceFailed)?;
        *self.active_slot() = Some(conversation.id.clone());
        tracing::info!(
            conv_id = %conversation.id,
            user_id = %self.owner_id,
            "Conversation created"
        );

        self.refresh_quietly().await;
        Ok(conversation)
    }

    /// Point at a conversation. Ownership is checked when it is opened.
    pub fn select(&self, conv_id: &str) {
        *self.active_slot() = Some(conv_id.to_string());
    }

    pub fn active(&self) -> Option<String> {
        self.active_slot().clone()
    }

    /// Delete a conversation: its turns first, then the record.
    pub async fn remove(&self, conv_id: &str) -> Result<RemoveOutcome, SessionError> {
        let found = self
            .storage
            .conversation_by_id(conv_id)
            .await
            .map_err(SessionError::PersistenceFailed)?;

        let outcome = match found {
            None => RemoveOutcome::AlreadyAbsent,
            Some(c) if !authorize(&self.owner_id, &c) => return Err(SessionError::AccessDenied),
            Some(_) => {
                let turns = self
                    .storage
                    .delete_turns_by_conversation(conv_id)
                    .await
                    .map_err(SessionError::PersistenceFailed)?;
                let deleted = self
                    .storage
                    .delete_conversation(conv_id)
                    .await
                    .map_err(SessionError::PersistenceFailed)?;
                tracing::info!(
                    conv_id = %conv_id,
                    user_id = %self.owner_id,
                    turns,
                    "Conversation removed"
                );
                if deleted {
                    RemoveOutcome::Removed
                } else {
                    RemoveOutcome::AlreadyAbsent
                }
            }
        };

        {
            let mut active = self.active_slot();
            if active.as_deref() == Some(conv_id) {
                *active = None;
            }
        }

        self.refresh_quietly().await;
        Ok(outcome)
    }

    async fn refresh_quietly(&self) {
        if let Err(e) = self.list().await {
            tracing::warn!(
                user_id = %self.owner_id,
                error = %e,
                "Conversation list refresh failed"
            );
        }
    }

    /// Refresh the list whenever the store reports a change for this owner.
    /// The task ends when the feed closes or the navigator is dropped.
    pub fn watch(self: &Arc<Self>) -> JoinHandle<()> {
        let mut feed = self.storage.subscribe();
        let navigator: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let relevant = match feed.recv().await {
                    Ok(event) => {
                        let Some(nav) = navigator.upgrade() else { break };
                        event.owner_id == nav.owner_id
                    }
                    // Missed events; assume one of them was ours
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Change feed lagged");
                        true
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !relevant {
                    continue;
                }
                let Some(nav) = navigator.upgrade() else { break };
                nav.refresh_quietly().await;
            }
        })
    }
}
