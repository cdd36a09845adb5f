//! Tree operation error types

use chat_core::Role;
use thiserror::Error;
use uuid::Uuid;

/// Typed failures of tree operations.
///
/// Structural problems in the message graph (dangling parents, cycles) are
/// deliberately *not* errors: the navigator tolerates them and reports them
/// as [`crate::navigator::StructuralIssue`] diagnostics instead, so the
/// conversation stays renderable even with partially-synced data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("message not found: {0}")]
    NotFound(Uuid),

    #[error("message {message_id} has role {actual}, operation requires {expected}")]
    InvalidRole {
        message_id: Uuid,
        expected: Role,
        actual: Role,
    },
}

pub type Result<T> = std::result::Result<T, TreeError>;
