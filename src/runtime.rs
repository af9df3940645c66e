//! Runtime for conversation sessions
//!
//! Owns the live sessions (one per user and conversation) and one
//! navigator per user.

mod error;
mod navigator;
mod session;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use error::SessionError;
pub use navigator::{Navigator, RemoveOutcome};
pub use session::{ChatSession, RetryPolicy, SessionConfig, SessionTurn, DEFAULT_COMPLETION_TIMEOUT};
pub use traits::*;

use crate::db::Conversation;
use crate::llm::LlmError;
use crate::state_machine::SessionContext;
use crate::system_prompt::PromptPolicy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Type alias for the production manager
pub type ProductionManager = SessionManager<DatabaseStorage, ServiceCompletionClient>;

type SessionKey = (String, String);

struct NavigatorHandle<S: Storage> {
    navigator: Arc<Navigator<Arc<S>>>,
    watcher: JoinHandle<()>,
}

/// Manager for all live sessions and navigators
///
/// A session lives until it is closed, its conversation is removed, or its
/// user signs out. A navigator lives while its user has a live session or an
/// open list stream; closing the last session evicts an unwatched one.
pub struct SessionManager<S: Storage, C: CompletionClient> {
    storage: Arc<S>,
    client: Arc<C>,
    config: SessionConfig,
    sessions: RwLock<HashMap<SessionKey, Arc<ChatSession<Arc<S>, Arc<C>>>>>,
    navigators: RwLock<HashMap<String, NavigatorHandle<S>>>,
}

impl<S, C> SessionManager<S, C>
where
    S: Storage + 'static,
    C: CompletionClient + 'static,
{
    pub fn new(storage: S, client: C, config: SessionConfig) -> Self {
        Self {
            storage: Arc::new(storage),
            client: Arc::new(client),
            config,
            sessions: RwLock::new(HashMap::new()),
            navigators: RwLock::new(HashMap::new()),
        }
    }

    pub fn model_id(&self) -> &str {
        self.client.model_id()
    }

    /// The user's navigator, created and wired to the change feed on first use
    pub async fn navigator(&self, user_id: &str) -> Arc<Navigator<Arc<S>>> {
        if let Some(handle) = self.navigators.read().await.get(user_id) {
            return Arc::clone(&handle.navigator);
        }

        let mut navigators = self.navigators.write().await;
        // Double-check after acquiring write lock
        if let Some(handle) = navigators.get(user_id) {
            return Arc::clone(&handle.navigator);
        }

        let navigator = Arc::new(Navigator::new(user_id, Arc::clone(&self.storage)));
        let watcher = navigator.watch();
        navigators.insert(
            user_id.to_string(),
            NavigatorHandle {
                navigator: Arc::clone(&navigator),
                watcher,
            },
        );
        tracing::debug!(user_id = %user_id, "Navigator started");
        navigator
    }

    /// Open a conversation for a user. A successful open replaces any idle
    /// live session the user had on it and makes it the active conversation.
    /// A session still awaiting a completion is kept and returned instead.
    pub async fn open(
        &self,
        user_id: &str,
        conv_id: &str,
    ) -> Result<(Arc<ChatSession<Arc<S>, Arc<C>>>, Conversation), SessionError> {
        let session = Arc::new(ChatSession::new(
            SessionContext::new(conv_id, user_id),
            Arc::clone(&self.storage),
            Arc::clone(&self.client),
            self.config,
        ));
        let conversation = session.open().await?;

        let live = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(&key(user_id, conv_id)) {
                Some(existing) if existing.state().is_busy() => {
                    tracing::debug!(conv_id = %conv_id, user_id = %user_id, "Reusing busy session");
                    session.close();
                    Arc::clone(existing)
                }
                _ => {
                    let previous = sessions.insert(key(user_id, conv_id), Arc::clone(&session));
                    if let Some(previous) = previous {
                        previous.close();
                    }
                    session
                }
            }
        };

        self.navigator(user_id).await.select(conv_id);
        Ok((live, conversation))
    }

    /// The live session, opening one if needed
    pub async fn session(
        &self,
        user_id: &str,
        conv_id: &str,
    ) -> Result<Arc<ChatSession<Arc<S>, Arc<C>>>, SessionError> {
        if let Some(session) = self.sessions.read().await.get(&key(user_id, conv_id)) {
            return Ok(Arc::clone(session));
        }
        self.open(user_id, conv_id).await.map(|(session, _)| session)
    }

    pub async fn submit(
        &self,
        user_id: &str,
        conv_id: &str,
        text: &str,
    ) -> Result<SessionTurn, SessionError> {
        self.session(user_id, conv_id).await?.submit(text).await
    }

    /// Close and forget a live session. Returns whether one existed. The
    /// user's navigator goes too once nothing else holds it.
    pub async fn close(&self, user_id: &str, conv_id: &str) -> bool {
        let closed = self.close_session(user_id, conv_id).await;
        if closed {
            self.evict_idle_navigator(user_id).await;
        }
        closed
    }

    async fn close_session(&self, user_id: &str, conv_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(&key(user_id, conv_id));
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// First message without a conversation: create one, open it, submit.
    pub async fn start(
        &self,
        user_id: &str,
        text: &str,
    ) -> Result<(Conversation, Result<SessionTurn, SessionError>), SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::ValidationFailed);
        }
        let created = self.navigator(user_id).await.create().await?;
        let (session, conversation) = self.open(user_id, &created.id).await?;
        let outcome = session.submit(text).await;
        Ok((conversation, outcome))
    }

    /// Delete a conversation after closing any live session on it
    pub async fn remove(
        &self,
        user_id: &str,
        conv_id: &str,
    ) -> Result<RemoveOutcome, SessionError> {
        let navigator = self.navigator(user_id).await;
        let outcome = navigator.remove(conv_id).await?;
        self.close_session(user_id, conv_id).await;
        Ok(outcome)
    }

    /// Drop the user's navigator and its watch task when the user has no
    /// live session and no list subscriber. Returns whether it was dropped.
    async fn evict_idle_navigator(&self, user_id: &str) -> bool {
        if self.sessions.read().await.keys().any(|(u, _)| u == user_id) {
            return false;
        }
        let mut navigators = self.navigators.write().await;
        let idle = navigators
            .get(user_id)
            .is_some_and(|handle| handle.navigator.subscriber_count() == 0);
        if !idle {
            return false;
        }
        if let Some(handle) = navigators.remove(user_id) {
            handle.watcher.abort();
        }
        tracing::debug!(user_id = %user_id, "Navigator evicted");
        true
    }

    /// Drop everything held for a user
    pub async fn sign_out(&self, user_id: &str) {
        let closed: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            let keys: Vec<SessionKey> = sessions
                .keys()
                .filter(|(u, _)| u == user_id)
                .cloned()
                .collect();
            keys.into_iter().filter_map(|k| sessions.remove(&k)).collect()
        };
        for session in &closed {
            session.close();
        }
        if let Some(handle) = self.navigators.write().await.remove(user_id) {
            handle.watcher.abort();
        }
        tracing::info!(user_id = %user_id, sessions = closed.len(), "User signed out");
    }

    /// Stateless single prompt: instruction plus input, nothing stored
    pub async fn one_shot(&self, text: &str) -> Result<String, SessionError> {
        let input = text.trim();
        if input.is_empty() {
            return Err(SessionError::ValidationFailed);
        }
        let policy = PromptPolicy {
            max_output_tokens: self.config.prompt.max_output_tokens,
            ..PromptPolicy::single_shot()
        };
        let request = policy.build_request(&[], input);

        let completion = self.client.complete(&request);
        match tokio::time::timeout(self.config.completion_timeout, completion).await {
            Ok(Ok(response)) => Ok(response.text),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(LlmError::timeout(format!(
                "No response within {}s",
                self.config.completion_timeout.as_secs()
            ))
            .into()),
        }
    }
}

fn key(user_id: &str, conv_id: &str) -> SessionKey {
    (user_id.to_string(), conv_id.to_string())
}
