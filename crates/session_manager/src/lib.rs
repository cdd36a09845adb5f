//! session_manager - Conversation Session Controller
//!
//! The stateful glue between the pure tree logic in `conversation_tree` and
//! the outside world: a long-lived subscription to the message store's
//! change feed, an optimistic local overlay so sends feel instantaneous, and
//! the fold of a streaming completion into the in-progress assistant
//! message. Exactly one completion streams per conversation at a time.

pub mod completion;
pub mod controller;
pub mod error;
pub mod machine;
pub mod store;

// Re-export commonly used types
pub use completion::{CompletionClient, CompletionEvent, CompletionStream, Turn};
pub use controller::ChatSession;
pub use error::{Result, SessionError};
pub use machine::{StateMachine, TurnEvent, TurnState};
pub use store::{MemoryMessageStore, MessageStore, StoreSubscription, UnsubscribeGuard};
