//! Conversation session state machine
//!
//! Pure transitions; the runtime executes the resulting effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{DenyReason, SessionContext, SessionState};
pub use transition::{transition, TransitionError};
