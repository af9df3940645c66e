//! Conversation session controller
//!
//! Owns one conversation's in-memory turn list and drives
//! submit -> completion -> patch -> persist through the pure state machine.

use super::error::SessionError;
use super::traits::{CompletionClient, Storage};
use crate::auth::authorize;
use crate::db::{Conversation, Turn};
use crate::llm::{LlmError, LlmRequest};
use crate::state_machine::{
    transition, DenyReason, Effect, Event, SessionContext, SessionState, TransitionError,
};
use crate::system_prompt::{Exchange, PromptPolicy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

/// Bounded exponential backoff for writing a finalized turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Tunables shared by every session
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub completion_timeout: Duration,
    pub persist_retry: RetryPolicy,
    pub prompt: PromptPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
            persist_retry: RetryPolicy::default(),
            prompt: PromptPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Waiting for the completion
    Pending,
    /// Completion failed; response stays empty
    Failed,
    /// Response received but the write did not go through
    Unsaved,
    /// Durable
    Saved,
}

/// A turn as the session sees it, provisional or durable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionTurn {
    /// Store id, present once saved
    pub id: Option<String>,
    pub input: String,
    pub response: String,
    pub status: TurnStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Turn> for SessionTurn {
    fn from(turn: Turn) -> Self {
        SessionTurn {
            id: Some(turn.id),
            input: turn.user_input,
            response: turn.bot_response,
            status: TurnStatus::Saved,
            error: None,
            created_at: turn.created_at,
        }
    }
}

struct Inner {
    state: SessionState,
    turns: Vec<SessionTurn>,
}

/// One user's view of one conversation
pub struct ChatSession<S: Storage, C: CompletionClient> {
    context: SessionContext,
    storage: S,
    client: C,
    config: SessionConfig,
    inner: Mutex<Inner>,
}

impl<S, C> ChatSession<S, C>
where
    S: Storage + 'static,
    C: CompletionClient + 'static,
{
    pub fn new(context: SessionContext, storage: S, client: C, config: SessionConfig) -> Self {
        Self {
            context,
            storage,
            client,
            config,
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                turns: Vec::new(),
            }),
        }
    }

    #[allow(dead_code)] // Used in tests
    pub fn conversation_id(&self) -> &str {
        &self.context.conversation_id
    }

    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// In-memory turns, including provisional ones
    pub fn turns(&self) -> Vec<SessionTurn> {
        self.lock().turns.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one transition and apply its in-memory effects. Returns the I/O
    /// effects for the caller to execute once the lock is released.
    fn step(&self, inner: &mut Inner, event: Event) -> Result<Vec<Effect>, TransitionError> {
        let result = transition(&inner.state, &self.context, event)?;
        tracing::debug!(
            conv_id = %self.context.conversation_id,
            from = inner.state.name(),
            to = result.new_state.name(),
            "Session transition"
        );
        inner.state = result.new_state;

        let mut io = Vec::new();
        for effect in result.effects {
            match effect {
                Effect::LoadTurns { turns } => {
                    inner.turns = turns.into_iter().map(SessionTurn::from).collect();
                }
                Effect::AppendProvisional { input } => inner.turns.push(SessionTurn {
                    id: None,
                    input,
                    response: String::new(),
                    status: TurnStatus::Pending,
                    error: None,
                    created_at: Utc::now(),
                }),
                Effect::PatchResponse { response } => {
                    if let Some(turn) = last_pending(&mut inner.turns) {
                        turn.response = response;
                        turn.status = TurnStatus::Unsaved;
                    }
                }
                Effect::MarkFailed { message } => {
                    if let Some(turn) = last_pending(&mut inner.turns) {
                        turn.status = TurnStatus::Failed;
                        turn.error = Some(message);
                    }
                }
                Effect::ClearTurns => inner.turns.clear(),
                io_effect => io.push(io_effect),
            }
        }
        Ok(io)
    }

    fn apply(&self, event: Event) -> Result<Vec<Effect>, TransitionError> {
        let mut inner = self.lock();
        self.step(&mut inner, event)
    }

    /// Load the conversation if the session's user owns it
    pub async fn open(&self) -> Result<Conversation, SessionError> {
        let conv_id = &self.context.conversation_id;

        let found = match self.storage.conversation_by_id(conv_id).await {
            Ok(found) => found,
            Err(e) => return Err(self.open_failed(e)),
        };

        let conversation = match found {
            Some(c) if authorize(&self.context.user_id, &c) => c,
            Some(_) => return Err(self.reject(DenyReason::AccessDenied)),
            None => return Err(self.reject(DenyReason::NotFound)),
        };

        let turns = match self.storage.turns_by_conversation(conv_id).await {
            Ok(turns) => turns,
            Err(e) => return Err(self.open_failed(e)),
        };
        let count = turns.len();

        self.apply(Event::Opened { turns })?;
        tracing::info!(
            conv_id = %conv_id,
            user_id = %self.context.user_id,
            turns = count,
            "Session opened"
        );
        Ok(conversation)
    }

    fn reject(&self, reason: DenyReason) -> SessionError {
        tracing::warn!(
            conv_id = %self.context.conversation_id,
            user_id = %self.context.user_id,
            ?reason,
            "Session open rejected"
        );
        match self.apply(reason.into()) {
            Ok(_) => reason.into(),
            Err(e) => e.into(),
        }
    }

    fn open_failed(&self, message: String) -> SessionError {
        tracing::error!(
            conv_id = %self.context.conversation_id,
            error = %message,
            "Session open failed"
        );
        let _ = self.apply(Event::OpenFailed {
            message: message.clone(),
        });
        SessionError::PersistenceFailed(message)
    }

    /// Submit a message and wait for the finalized turn.
    ///
    /// The provisional turn is visible through [`Self::turns`] as soon as
    /// this is called. The completion and the write run on their own task,
    /// so dropping the returned future never leaves the session busy.
    pub async fn submit(self: &Arc<Self>, text: &str) -> Result<SessionTurn, SessionError> {
        let (input, request) = {
            let mut inner = self.lock();
            let effects = self.step(
                &mut inner,
                Event::UserSubmit {
                    text: text.to_string(),
                },
            )?;
            let Some(input) = effects.into_iter().find_map(|e| match e {
                Effect::RequestCompletion { input } => Some(input),
                _ => None,
            }) else {
                return Err(SessionError::NotReady("no completion requested".to_string()));
            };

            let previous = inner.turns.len().saturating_sub(1);
            let history: Vec<Exchange<'_>> = inner.turns[..previous]
                .iter()
                .filter(|t| matches!(t.status, TurnStatus::Saved | TurnStatus::Unsaved))
                .map(|t| Exchange {
                    input: &t.input,
                    response: &t.response,
                })
                .collect();
            let request = self.config.prompt.build_request(&history, &input);
            (input, request)
        };

        tracing::info!(
            conv_id = %self.context.conversation_id,
            input_chars = input.chars().count(),
            "Turn submitted"
        );

        let session = Arc::clone(self);
        tokio::spawn(async move { session.finish(request).await })
            .await
            .unwrap_or_else(|e| {
                Err(SessionError::CompletionFailed {
                    kind: crate::llm::LlmErrorKind::Unknown,
                    message: format!("completion task aborted: {e}"),
                })
            })
    }

    async fn finish(&self, request: LlmRequest) -> Result<SessionTurn, SessionError> {
        let outcome = match tokio::time::timeout(
            self.config.completion_timeout,
            self.client.complete(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LlmError::timeout(format!(
                "No response within {}s",
                self.config.completion_timeout.as_secs()
            ))),
        };

        let response = match outcome {
            Ok(response) => response.text,
            Err(e) => {
                tracing::warn!(
                    conv_id = %self.context.conversation_id,
                    kind = ?e.kind,
                    error = %e.message,
                    "Completion failed"
                );
                self.apply(Event::CompletionFailed {
                    kind: e.kind,
                    message: e.message.clone(),
                })?;
                return Err(e.into());
            }
        };

        let effects = self.apply(Event::CompletionReceived {
            response: response.clone(),
        })?;

        let mut saved = None;
        for effect in effects {
            if let Effect::PersistTurn { input, response } = effect {
                saved = Some(self.persist(&input, &response).await);
            }
        }

        match saved {
            Some(Ok(turn)) => Ok(self
                .settle(Some(turn.id.clone()), &turn.bot_response, TurnStatus::Saved)
                .unwrap_or_else(|| turn.into())),
            Some(Err(e)) => {
                self.settle(None, &response, TurnStatus::Unsaved);
                Err(SessionError::PersistenceFailed(e))
            }
            None => Err(SessionError::NotReady("nothing to persist".to_string())),
        }
    }

    /// Record the write outcome on the patched turn, if it is still in memory
    fn settle(
        &self,
        id: Option<String>,
        response: &str,
        status: TurnStatus,
    ) -> Option<SessionTurn> {
        let mut inner = self.lock();
        let turn = inner
            .turns
            .iter_mut()
            .rev()
            .find(|t| t.status == TurnStatus::Unsaved && t.id.is_none() && t.response == response)?;
        turn.id = id;
        turn.status = status;
        Some(turn.clone())
    }

    async fn persist(&self, input: &str, response: &str) -> Result<Turn, String> {
        let policy = self.config.persist_retry;
        let mut attempt = 1;
        loop {
            match self
                .storage
                .insert_turn(&self.context.conversation_id, input, response)
                .await
            {
                Ok(turn) => return Ok(turn),
                Err(e) if attempt < policy.max_attempts => {
                    let delay = policy.delay_after(attempt);
                    tracing::warn!(
                        conv_id = %self.context.conversation_id,
                        attempt,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Turn write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        conv_id = %self.context.conversation_id,
                        attempts = attempt,
                        error = %e,
                        "Turn write failed, giving up"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Discard in-memory state. Safe to call any number of times.
    pub fn close(&self) {
        if let Err(e) = self.apply(Event::Close) {
            tracing::error!(conv_id = %self.context.conversation_id, error = %e, "Close rejected");
        }
    }
}

fn last_pending(turns: &mut [SessionTurn]) -> Option<&mut SessionTurn> {
    turns
        .iter_mut()
        .rev()
        .find(|t| t.status == TurnStatus::Pending)
}
