//! Branch Mutator - Structural edits as effect descriptions
//!
//! Each operation takes the snapshot and an intent and returns the *effect*
//! to apply (a message to insert, a field update, ids to delete). The caller
//! performs the actual store writes, so this composes with any persistence
//! backend and stays trivially testable.

use std::collections::HashSet;

use chat_core::{Message, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TreeError};
use crate::index::ChildIndex;
use crate::navigator::{ancestors_before_in, siblings_in, subtree_ids_in};

/// Which way to step through a sibling set.
///
/// `Previous` steps toward the *next* index in sibling order (the older,
/// lower-ranked alternate); `Next` toward the *previous* index (the newer
/// one). Non-obvious, but pinned to observed product behavior.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Previous,
    Next,
}

/// Effect of regenerating an assistant message: call the completion API with
/// `context`, then insert a fresh assistant sibling at `parent_id` with a
/// new `selected_at` so activation is explicit rather than relying on
/// creation-order fallback.
#[derive(Clone, Debug)]
pub struct RegenerateEffect {
    /// Ordered turns to send to the completion API, ending with the user
    /// message being answered.
    pub context: Vec<Message>,
    /// Parent of the new assistant sibling (same as the regenerated one's).
    pub parent_id: Option<Uuid>,
    pub role: Role,
}

/// Effect of editing a user message: insert a new, selected user sibling
/// carrying `content`. The original stays inspectable via sibling
/// navigation; history is branched, never rewritten.
#[derive(Clone, Debug)]
pub struct ResendEffect {
    pub parent_id: Option<Uuid>,
    pub role: Role,
    pub content: String,
}

/// Effect of a sibling switch: stamp `selected_at` on `target_id` only.
/// Other siblings keep their timestamps; the branch choice is determined by
/// the *maximum* `selected_at`, not by clearing the rest.
#[derive(Clone, Copy, Debug)]
pub struct SelectionEffect {
    pub target_id: Uuid,
    pub selected_at: DateTime<Utc>,
}

/// Describe the regeneration of `assistant_message_id`.
///
/// The returned context is the active-branch prefix through the parent user
/// message. Fails with [`TreeError::InvalidRole`] on a user message.
pub fn regenerate_from(
    messages: &[Message],
    assistant_message_id: Uuid,
) -> Result<RegenerateEffect> {
    let index = ChildIndex::new(messages);
    let message = index
        .get(assistant_message_id)
        .ok_or(TreeError::NotFound(assistant_message_id))?;
    expect_role(message, Role::Assistant)?;

    // Context ends at the parent user message. When the assistant sits on
    // the active branch this equals the prefix strictly before it; when it
    // does not, the parent alone still anchors the regeneration.
    let context = match message.parent_id.and_then(|pid| index.get(pid)) {
        Some(parent) => {
            let mut context = ancestors_before_in(&index, parent.id);
            context.push(parent.clone());
            context
        }
        None => Vec::new(),
    };

    tracing::debug!(
        message_id = %assistant_message_id,
        context_len = context.len(),
        "regenerate effect computed"
    );

    Ok(RegenerateEffect {
        context,
        parent_id: message.parent_id,
        role: Role::Assistant,
    })
}

/// Describe the edit-and-resend of `user_message_id` with `new_content`.
pub fn edit_and_resend(
    messages: &[Message],
    user_message_id: Uuid,
    new_content: impl Into<String>,
) -> Result<ResendEffect> {
    let index = ChildIndex::new(messages);
    let message = index
        .get(user_message_id)
        .ok_or(TreeError::NotFound(user_message_id))?;
    expect_role(message, Role::User)?;

    Ok(ResendEffect {
        parent_id: message.parent_id,
        role: Role::User,
        content: new_content.into(),
    })
}

/// Describe a sibling switch from `message_id` in `direction`.
///
/// At the boundary the target is `message_id` itself, with a fresh timestamp
/// regardless, so repeated advances past the end are idempotent in effect:
/// they reaffirm the same selection.
pub fn select_sibling(
    messages: &[Message],
    message_id: Uuid,
    direction: Direction,
) -> Result<SelectionEffect> {
    let index = ChildIndex::new(messages);
    let set = siblings_in(&index, message_id);
    let position = set
        .iter()
        .position(|m| m.id == message_id)
        .ok_or(TreeError::NotFound(message_id))?;

    let target = match direction {
        Direction::Previous => (position + 1).min(set.len() - 1),
        Direction::Next => position.saturating_sub(1),
    };

    tracing::debug!(
        message_id = %message_id,
        ?direction,
        from_index = position,
        to_index = target,
        "sibling switch effect computed"
    );

    Ok(SelectionEffect {
        target_id: set[target].id,
        selected_at: Utc::now(),
    })
}

/// Ids to delete so that `message_id` becomes the new leaf: its entire
/// descendant subtree, the message itself excluded.
///
/// Must be applied from this single snapshot; re-deriving mid-delete could
/// let a concurrently-inserted message escape.
pub fn truncate_after(messages: &[Message], message_id: Uuid) -> Result<HashSet<Uuid>> {
    let index = ChildIndex::new(messages);
    if !index.contains(message_id) {
        return Err(TreeError::NotFound(message_id));
    }
    Ok(subtree_ids_in(&index, message_id))
}

fn expect_role(message: &Message, expected: Role) -> Result<()> {
    if message.role != expected {
        return Err(TreeError::InvalidRole {
            message_id: message.id,
            expected,
            actual: message.role,
        });
    }
    Ok(())
}
