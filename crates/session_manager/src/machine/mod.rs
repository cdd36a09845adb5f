//! State machine module
//!
//! FSM for the lifecycle of one in-flight assistant turn.

mod events;
mod states;
mod transitions;

pub use events::TurnEvent;
pub use states::TurnState;
pub use transitions::{StateMachine, StateTransition};
