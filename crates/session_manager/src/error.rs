//! Session controller error types

use chat_core::Role;
use conversation_tree::TreeError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("message not found: {0}")]
    NotFound(Uuid),

    #[error("message {message_id} has role {actual}, operation requires {expected}")]
    InvalidRole {
        message_id: Uuid,
        expected: Role,
        actual: Role,
    },

    /// A completion is already streaming for this conversation; the new
    /// send/regenerate was rejected as a no-op.
    #[error("still generating a response for this conversation")]
    StillGenerating,

    #[error("store write failed: {0}")]
    StoreWrite(String),

    #[error("completion stream failed: {0}")]
    Stream(String),
}

impl From<TreeError> for SessionError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::NotFound(id) => Self::NotFound(id),
            TreeError::InvalidRole {
                message_id,
                expected,
                actual,
            } => Self::InvalidRole {
                message_id,
                expected,
                actual,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
