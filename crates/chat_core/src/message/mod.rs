//! Message module - Nodes of the conversation tree
//!
//! Messages form a tree via `parent_id` rather than a flat log: regenerating
//! or editing at any point creates a sibling alternate instead of rewriting
//! history. Only `role`, `parent_id`, `created_at` and `selected_at` take
//! part in navigation decisions; everything else is opaque payload.

mod payload;
mod role;

pub use payload::{MediaRef, UsageCounts};
pub use role::Role;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node in the conversation tree.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    /// Unique identifier, assigned at creation, immutable.
    pub id: Uuid,

    pub role: Role,

    /// Text body. Empty only transiently while a streamed response is being
    /// assembled.
    pub content: String,

    /// Set once at creation; the tie-break ordering within a sibling set
    /// when no explicit selection exists.
    pub created_at: DateTime<Utc>,

    /// Set only when this message is chosen as the active representative
    /// among its siblings. `None` means "never explicitly selected".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_at: Option<DateTime<Utc>>,

    /// `None` marks a conversation root. A non-`None` value should reference
    /// another message in the same conversation; the navigator tolerates
    /// violations rather than enforcing this as a constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,

    /// Model "thinking" text streamed alongside the answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    /// Inline media attached to this message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,

    /// Token accounting for the turn that produced this message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageCounts>,
}

impl Message {
    /// Create a user message under the given parent.
    pub fn user(content: impl Into<String>, parent_id: Option<Uuid>) -> Self {
        Self::new(Role::User, content.into(), parent_id)
    }

    /// Create an (initially empty) assistant message under the given parent.
    pub fn assistant(parent_id: Option<Uuid>) -> Self {
        Self::new(Role::Assistant, String::new(), parent_id)
    }

    fn new(role: Role, content: String, parent_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            created_at: Utc::now(),
            selected_at: None,
            parent_id,
            thinking: None,
            media: None,
            usage: None,
        }
    }

    /// Mark this message as explicitly selected now.
    pub fn selected(mut self) -> Self {
        self.selected_at = Some(Utc::now());
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A partial update to an existing message's fields.
///
/// Maps onto the store's `update_message_fields` write; `None` fields are
/// left untouched.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct MessagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageCounts>,
}

impl MessagePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn selection(at: DateTime<Utc>) -> Self {
        Self {
            selected_at: Some(at),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.selected_at.is_none()
            && self.thinking.is_none()
            && self.media.is_none()
            && self.usage.is_none()
    }

    /// Apply this patch to a message in place.
    pub fn apply(&self, message: &mut Message) {
        if let Some(content) = &self.content {
            message.content = content.clone();
        }
        if let Some(selected_at) = self.selected_at {
            message.selected_at = Some(selected_at);
        }
        if let Some(thinking) = &self.thinking {
            message.thinking = Some(thinking.clone());
        }
        if let Some(media) = &self.media {
            message.media = Some(media.clone());
        }
        if let Some(usage) = self.usage {
            message.usage = Some(usage);
        }
    }
}
