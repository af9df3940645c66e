//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::transition::*;
use super::*;
use crate::llm::LlmErrorKind;
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context() -> SessionContext {
    SessionContext::new("test-conv", "test-user")
}

fn count_provisional(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|e| matches!(e, Effect::AppendProvisional { .. }))
        .count()
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_whitespace() -> impl Strategy<Value = String> {
    "[ \t\r\n]{0,12}"
}

fn arb_message() -> impl Strategy<Value = String> {
    (arb_whitespace(), "[a-zA-Z0-9.,!?' ]{0,40}[a-zA-Z0-9.,!?']", arb_whitespace())
        .prop_map(|(lead, body, trail)| format!("{lead}{body}{trail}"))
}

fn arb_error_kind() -> impl Strategy<Value = LlmErrorKind> {
    prop_oneof![
        Just(LlmErrorKind::Network),
        Just(LlmErrorKind::Timeout),
        Just(LlmErrorKind::RateLimit),
        Just(LlmErrorKind::ServerError),
        Just(LlmErrorKind::Auth),
        Just(LlmErrorKind::InvalidRequest),
        Just(LlmErrorKind::Malformed),
        Just(LlmErrorKind::Unknown),
    ]
}

fn arb_terminal_state() -> impl Strategy<Value = SessionState> {
    prop_oneof![
        Just(SessionState::Denied {
            reason: DenyReason::AccessDenied
        }),
        Just(SessionState::Denied {
            reason: DenyReason::NotFound
        }),
        "[a-z ]{1,20}".prop_map(|message| SessionState::Failed { message }),
        Just(SessionState::Closed { in_flight: None }),
    ]
}

fn arb_any_state() -> impl Strategy<Value = SessionState> {
    prop_oneof![
        Just(SessionState::Uninitialized),
        Just(SessionState::Ready),
        "[a-z]{1,10}".prop_map(|input| SessionState::AwaitingCompletion { input }),
        arb_terminal_state(),
        "[a-z]{1,10}".prop_map(|input| SessionState::Closed {
            in_flight: Some(input)
        }),
    ]
}

fn arb_non_close_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        Just(Event::Opened { turns: vec![] }),
        Just(Event::OpenRejected {
            reason: DenyReason::NotFound
        }),
        "[a-z]{1,10}".prop_map(|message| Event::OpenFailed { message }),
        arb_message().prop_map(|text| Event::UserSubmit { text }),
        "[a-z]{1,10}".prop_map(|response| Event::CompletionReceived { response }),
        (arb_error_kind(), "[a-z]{1,10}")
            .prop_map(|(kind, message)| Event::CompletionFailed { kind, message }),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Whitespace-only input never produces effects
    #[test]
    fn blank_input_is_rejected(text in arb_whitespace()) {
        let result = transition(&SessionState::Ready, &test_context(), Event::UserSubmit { text });
        prop_assert_eq!(result.unwrap_err(), TransitionError::EmptyInput);
    }

    /// Non-empty input appends exactly one provisional turn holding the trimmed text
    #[test]
    fn submit_appends_exactly_one_provisional_turn(text in arb_message()) {
        let result = transition(
            &SessionState::Ready,
            &test_context(),
            Event::UserSubmit { text: text.clone() },
        ).unwrap();

        prop_assert_eq!(count_provisional(&result.effects), 1);
        let expected = Effect::AppendProvisional { input: text.trim().to_string() };
        prop_assert!(result.effects.contains(&expected));
        prop_assert!(result.new_state.is_busy());
    }

    /// A second submit while awaiting is refused, whatever the text
    #[test]
    fn submit_while_awaiting_is_busy(pending in arb_message(), text in arb_message()) {
        let state = SessionState::AwaitingCompletion { input: pending };
        let result = transition(&state, &test_context(), Event::UserSubmit { text });
        prop_assert_eq!(result.unwrap_err(), TransitionError::Busy);
    }

    /// Every completion outcome clears the busy state
    #[test]
    fn completion_outcome_clears_busy(
        input in arb_message(),
        kind in arb_error_kind(),
        succeed in any::<bool>(),
    ) {
        let state = SessionState::AwaitingCompletion { input };
        let event = if succeed {
            Event::CompletionReceived { response: "ok".to_string() }
        } else {
            Event::CompletionFailed { kind, message: "failed".to_string() }
        };
        let result = transition(&state, &test_context(), event).unwrap();
        prop_assert_eq!(result.new_state, SessionState::Ready);
    }

    /// Only a successful completion ever persists a turn
    #[test]
    fn persist_only_follows_a_response(state in arb_any_state(), event in arb_non_close_event()) {
        let is_response = matches!(event, Event::CompletionReceived { .. });
        if let Ok(result) = transition(&state, &test_context(), event) {
            let persists = result.effects.iter().any(|e| matches!(e, Effect::PersistTurn { .. }));
            prop_assert!(!persists || is_response);
        }
    }

    /// Close always lands in Closed and a second Close changes nothing
    #[test]
    fn close_is_idempotent(state in arb_any_state()) {
        let first = transition(&state, &test_context(), Event::Close).unwrap();
        let closed = matches!(first.new_state, SessionState::Closed { .. });
        prop_assert!(closed);

        let second = transition(&first.new_state, &test_context(), Event::Close).unwrap();
        prop_assert_eq!(&second.new_state, &first.new_state);
        prop_assert!(second.effects.is_empty());
    }

    /// Terminal states accept nothing but Close
    #[test]
    fn terminal_states_reject_input(state in arb_terminal_state(), event in arb_non_close_event()) {
        let result = transition(&state, &test_context(), event);
        prop_assert!(result.is_err());
    }
}
