//! Effects produced by state transitions

use crate::db::Turn;

/// Effects to be executed after a state transition.
///
/// The in-memory effects are applied by the session while it still holds
/// its lock; `RequestCompletion` and `PersistTurn` are I/O and run after the
/// lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Replace the in-memory turn list with durable turns
    LoadTurns { turns: Vec<Turn> },

    /// Append a provisional turn with an empty response
    AppendProvisional { input: String },

    /// Ask the completion client for a response to `input`
    RequestCompletion { input: String },

    /// Fill the response of the last provisional turn
    PatchResponse { response: String },

    /// Leave the last provisional turn unfinished and record why
    MarkFailed { message: String },

    /// Write the finalized turn through the store
    PersistTurn { input: String, response: String },

    /// Discard in-memory turns
    ClearTurns,
}
