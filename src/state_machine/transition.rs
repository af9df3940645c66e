//! Pure state transition function

use super::{DenyReason, Effect, Event, SessionContext, SessionState};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Session is not ready for input")]
    NotReady,
    #[error("A response is still being generated for this conversation")]
    Busy,
    #[error("Message is empty")]
    EmptyInput,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs and performs
/// no I/O. Submit checks run in a fixed order: readiness, then busy, then
/// input validation.
pub fn transition(
    state: &SessionState,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Open
        // ============================================================
        (SessionState::Uninitialized, Event::Opened { turns }) => {
            Ok(TransitionResult::new(SessionState::Ready).with_effect(Effect::LoadTurns { turns }))
        }

        (SessionState::Uninitialized, Event::OpenRejected { reason }) => {
            Ok(TransitionResult::new(SessionState::Denied { reason }))
        }

        (SessionState::Uninitialized, Event::OpenFailed { message }) => {
            Ok(TransitionResult::new(SessionState::Failed { message }))
        }

        // ============================================================
        // Submit
        // ============================================================
        (SessionState::Ready, Event::UserSubmit { text }) => {
            let input = text.trim();
            if input.is_empty() {
                return Err(TransitionError::EmptyInput);
            }
            let input = input.to_string();
            Ok(TransitionResult::new(SessionState::AwaitingCompletion {
                input: input.clone(),
            })
            .with_effect(Effect::AppendProvisional {
                input: input.clone(),
            })
            .with_effect(Effect::RequestCompletion { input }))
        }

        (SessionState::AwaitingCompletion { .. }, Event::UserSubmit { .. }) => {
            Err(TransitionError::Busy)
        }

        (
            SessionState::Uninitialized
            | SessionState::Denied { .. }
            | SessionState::Failed { .. }
            | SessionState::Closed { .. },
            Event::UserSubmit { .. },
        ) => Err(TransitionError::NotReady),

        // ============================================================
        // Completion outcome
        // ============================================================
        (SessionState::AwaitingCompletion { input }, Event::CompletionReceived { response }) => {
            Ok(TransitionResult::new(SessionState::Ready)
                .with_effect(Effect::PatchResponse {
                    response: response.clone(),
                })
                .with_effect(Effect::PersistTurn {
                    input: input.clone(),
                    response,
                }))
        }

        (SessionState::AwaitingCompletion { .. }, Event::CompletionFailed { message, .. }) => {
            Ok(TransitionResult::new(SessionState::Ready)
                .with_effect(Effect::MarkFailed { message }))
        }

        // The exchange happened even though nobody is looking any more
        (
            SessionState::Closed {
                in_flight: Some(input),
            },
            Event::CompletionReceived { response },
        ) => Ok(
            TransitionResult::new(SessionState::Closed { in_flight: None }).with_effect(
                Effect::PersistTurn {
                    input: input.clone(),
                    response,
                },
            ),
        ),

        (
            SessionState::Closed {
                in_flight: Some(_),
            },
            Event::CompletionFailed { .. },
        ) => Ok(TransitionResult::new(SessionState::Closed { in_flight: None })),

        // ============================================================
        // Close (idempotent)
        // ============================================================
        (SessionState::Closed { in_flight }, Event::Close) => {
            Ok(TransitionResult::new(SessionState::Closed {
                in_flight: in_flight.clone(),
            }))
        }

        (SessionState::AwaitingCompletion { input }, Event::Close) => {
            Ok(TransitionResult::new(SessionState::Closed {
                in_flight: Some(input.clone()),
            })
            .with_effect(Effect::ClearTurns))
        }

        (_, Event::Close) => Ok(TransitionResult::new(SessionState::Closed { in_flight: None })
            .with_effect(Effect::ClearTurns)),

        // ============================================================
        // Everything else is a programming error in the caller
        // ============================================================
        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "conversation {}: {} cannot handle {}",
            context.conversation_id,
            state.name(),
            event.name()
        ))),
    }
}

impl From<DenyReason> for Event {
    fn from(reason: DenyReason) -> Self {
        Event::OpenRejected { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmErrorKind;

    fn ctx() -> SessionContext {
        SessionContext::new("conv-1", "alice")
    }

    fn submit(text: &str) -> Event {
        Event::UserSubmit {
            text: text.to_string(),
        }
    }

    #[test]
    fn open_loads_turns_and_becomes_ready() {
        let opened = Event::Opened { turns: vec![] };
        let result = transition(&SessionState::Uninitialized, &ctx(), opened).unwrap();
        assert_eq!(result.new_state, SessionState::Ready);
        assert_eq!(result.effects, vec![Effect::LoadTurns { turns: vec![] }]);
    }

    #[test]
    fn rejected_open_is_terminal() {
        let denied = DenyReason::AccessDenied.into();
        let result = transition(&SessionState::Uninitialized, &ctx(), denied).unwrap();
        assert!(result.new_state.is_terminal());
        assert!(result.effects.is_empty());

        let err = transition(&result.new_state, &ctx(), submit("hello")).unwrap_err();
        assert_eq!(err, TransitionError::NotReady);
    }

    #[test]
    fn submit_trims_and_requests_completion() {
        let result = transition(&SessionState::Ready, &ctx(), submit("  I feel stuck \n")).unwrap();
        assert_eq!(
            result.new_state,
            SessionState::AwaitingCompletion {
                input: "I feel stuck".to_string()
            }
        );
        assert_eq!(
            result.effects,
            vec![
                Effect::AppendProvisional {
                    input: "I feel stuck".to_string()
                },
                Effect::RequestCompletion {
                    input: "I feel stuck".to_string()
                },
            ]
        );
    }

    #[test]
    fn whitespace_submit_is_rejected_without_effects() {
        assert_eq!(
            transition(&SessionState::Ready, &ctx(), submit("   ")).unwrap_err(),
            TransitionError::EmptyInput
        );
    }

    #[test]
    fn busy_is_checked_before_validation() {
        let awaiting = SessionState::AwaitingCompletion {
            input: "x".to_string(),
        };
        assert_eq!(
            transition(&awaiting, &ctx(), submit("")).unwrap_err(),
            TransitionError::Busy
        );
    }

    #[test]
    fn completion_patches_and_persists() {
        let awaiting = SessionState::AwaitingCompletion {
            input: "hi".to_string(),
        };
        let result = transition(
            &awaiting,
            &ctx(),
            Event::CompletionReceived {
                response: "hello".to_string(),
            },
        )
        .unwrap();
        assert_eq!(result.new_state, SessionState::Ready);
        assert_eq!(
            result.effects,
            vec![
                Effect::PatchResponse {
                    response: "hello".to_string()
                },
                Effect::PersistTurn {
                    input: "hi".to_string(),
                    response: "hello".to_string()
                },
            ]
        );
    }

    #[test]
    fn completion_failure_returns_to_ready_without_persisting() {
        let awaiting = SessionState::AwaitingCompletion {
            input: "hi".to_string(),
        };
        let result = transition(
            &awaiting,
            &ctx(),
            Event::CompletionFailed {
                kind: LlmErrorKind::Timeout,
                message: "deadline".to_string(),
            },
        )
        .unwrap();
        assert_eq!(result.new_state, SessionState::Ready);
        assert!(result.effects.iter().all(|e| !matches!(e, Effect::PersistTurn { .. })));
    }

    #[test]
    fn completion_after_close_is_still_persisted() {
        let awaiting = SessionState::AwaitingCompletion {
            input: "hi".to_string(),
        };
        let closed = transition(&awaiting, &ctx(), Event::Close).unwrap();
        assert_eq!(closed.effects, vec![Effect::ClearTurns]);

        let result = transition(
            &closed.new_state,
            &ctx(),
            Event::CompletionReceived {
                response: "late".to_string(),
            },
        )
        .unwrap();
        assert_eq!(result.new_state, SessionState::Closed { in_flight: None });
        assert_eq!(
            result.effects,
            vec![Effect::PersistTurn {
                input: "hi".to_string(),
                response: "late".to_string()
            }]
        );
    }

    #[test]
    fn stray_completion_is_invalid() {
        let err = transition(
            &SessionState::Ready,
            &ctx(),
            Event::CompletionReceived {
                response: "?".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition(msg) if msg.contains("conv-1")));
    }
}
