//! Turn states - Lifecycle of one in-flight assistant turn
//!
//! The tree shape is decided once, when the assistant message is created;
//! streaming only overwrites that message's content. These states track the
//! stream itself, not the tree.

use serde::{Deserialize, Serialize};

/// The possible states of an assistant turn.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No turn in flight, awaiting user input.
    #[default]
    Idle,

    /// Request sent, waiting for the first token.
    AwaitingFirstToken,

    /// Actively folding stream deltas into the in-progress message.
    Streaming,

    /// The turn completed (normally or by cancellation); the message is a
    /// finalized leaf with whatever content arrived.
    Finalized,

    /// The stream failed; the partial message was kept with the error text
    /// appended so the failure stays visible in the branch.
    Errored {
        error: String,
    },
}

impl TurnState {
    /// Whether a completion is currently in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::AwaitingFirstToken | Self::Streaming)
    }
}
