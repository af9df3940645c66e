//! System instruction and prompt construction
//!
//! Every completion request carries the same fixed system instruction.
//! Prior exchanges of the session are threaded in explicitly by the caller,
//! never held in process-wide state.

use crate::llm::{LlmMessage, LlmRequest};

/// Fixed instruction establishing the assistant's role
pub const SYSTEM_INSTRUCTION: &str = r"You are Mindline, a warm and attentive companion for people who want to talk about how they are feeling.

Listen carefully, reflect back what you hear, and respond with empathy and without judgement. Keep replies short and conversational. Ask gentle, open questions when it helps the person explore their feelings.

You are not a therapist or a doctor. Do not diagnose conditions or recommend medication. When it seems useful, encourage the person to reach out to people they trust or to a mental-health professional.

If the person mentions wanting to hurt themselves or someone else, or describes being in danger, respond calmly and with care, and urge them to contact local emergency services or a crisis line right away (for example 988 in the United States, or 116 123 for Samaritans in the UK and Ireland).";

/// Default number of prior exchanges sent along with a new message
pub const DEFAULT_HISTORY_TURNS: usize = 10;

/// How much of a session's history goes into each completion request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptPolicy {
    /// Most recent completed exchanges to include. Zero sends the new input alone.
    pub history_turns: usize,
    pub max_output_tokens: Option<u32>,
}

impl Default for PromptPolicy {
    fn default() -> Self {
        Self {
            history_turns: DEFAULT_HISTORY_TURNS,
            max_output_tokens: None,
        }
    }
}

/// A completed exchange usable as context
#[derive(Debug, Clone, Copy)]
pub struct Exchange<'a> {
    pub input: &'a str,
    pub response: &'a str,
}

impl PromptPolicy {
    /// Single-shot prompt: instruction plus input, no history
    pub fn single_shot() -> Self {
        Self {
            history_turns: 0,
            ..Self::default()
        }
    }

    /// Build a request for `input`. Exchanges with an empty response are
    /// skipped; only the last `history_turns` completed ones are kept.
    pub fn build_request(&self, history: &[Exchange<'_>], input: &str) -> LlmRequest {
        let completed: Vec<&Exchange<'_>> = history
            .iter()
            .filter(|e| !e.response.trim().is_empty())
            .collect();
        let skip = completed.len().saturating_sub(self.history_turns);

        let mut messages = Vec::with_capacity((completed.len() - skip) * 2 + 1);
        for exchange in completed.into_iter().skip(skip) {
            messages.push(LlmMessage::user(exchange.input));
            messages.push(LlmMessage::assistant(exchange.response));
        }
        messages.push(LlmMessage::user(input));

        LlmRequest {
            system: Some(SYSTEM_INSTRUCTION.to_string()),
            messages,
            max_tokens: self.max_output_tokens,
        }
    }
}
