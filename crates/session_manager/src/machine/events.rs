//! Turn events - What can happen to an in-flight turn

use serde::{Deserialize, Serialize};

/// Events that drive [`super::TurnState`] transitions.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnEvent {
    /// A send/regenerate was accepted and the request is on its way.
    TurnStarted,

    /// The first token of the response arrived.
    StreamStarted,

    /// A subsequent text/thinking delta arrived.
    DeltaReceived,

    /// The stream reported `Done`.
    StreamCompleted,

    /// The stream reported an error or the transport failed.
    StreamFailed { error: String },

    /// The user cancelled the turn; the partial message stays as a leaf.
    Cancelled,
}
