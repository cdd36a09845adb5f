//! Turn transitions - FSM transition logic
//!
//! Event-driven transitions for the per-turn state machine. Unknown
//! state/event combinations keep the current state rather than failing: the
//! stream feed is external input and must never wedge the controller.

use super::events::TurnEvent;
use super::states::TurnState;

/// Represents a state transition result.
#[derive(Debug, Clone)]
pub struct StateTransition {
    /// The state before the transition.
    pub from: TurnState,
    /// The state after the transition.
    pub to: TurnState,
    /// The event that triggered the transition.
    pub event: TurnEvent,
    /// Whether the state actually changed.
    pub changed: bool,
}

/// State machine for one conversation's assistant turns.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current_state: TurnState,
    /// Transition history (limited).
    history: Vec<StateTransition>,
    max_history: usize,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine in Idle state.
    pub fn new() -> Self {
        Self {
            current_state: TurnState::Idle,
            history: Vec::new(),
            max_history: 50,
        }
    }

    pub fn state(&self) -> &TurnState {
        &self.current_state
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Handle an event and transition to a new state.
    pub fn handle_event(&mut self, event: TurnEvent) -> StateTransition {
        let old_state = self.current_state.clone();
        let new_state = Self::compute_next_state(&old_state, &event);
        let changed = old_state != new_state;

        self.current_state = new_state.clone();

        let transition = StateTransition {
            from: old_state,
            to: new_state,
            event,
            changed,
        };

        self.history.push(transition.clone());
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        transition
    }

    fn compute_next_state(state: &TurnState, event: &TurnEvent) -> TurnState {
        use TurnEvent::*;
        use TurnState::*;

        match (state, event) {
            // A new turn may start from any settled state.
            (Idle | Finalized | Errored { .. }, TurnStarted) => AwaitingFirstToken,

            (AwaitingFirstToken, StreamStarted) => Streaming,
            // A delta before an explicit start still means we are streaming.
            (AwaitingFirstToken, DeltaReceived) => Streaming,
            (Streaming, StreamStarted | DeltaReceived) => Streaming,

            (AwaitingFirstToken | Streaming, StreamCompleted) => Finalized,
            // A cancelled turn finalizes with whatever content arrived; it
            // is still a valid branch the user might keep.
            (AwaitingFirstToken | Streaming, Cancelled) => Finalized,
            (AwaitingFirstToken | Streaming, StreamFailed { error }) => Errored {
                error: error.clone(),
            },

            // Everything else leaves the state untouched.
            _ => state.clone(),
        }
    }
}
