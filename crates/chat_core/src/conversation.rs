//! Conversation - Container and configuration for one chat
//!
//! A conversation owns its identity, display title and model configuration.
//! The message tree itself lives in the store, keyed by the conversation id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat container: identity, title, and model/parameter configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Conversation {
    pub id: Uuid,

    /// Display title shown in the conversation list.
    pub title: String,

    /// Identifier of the model configured for this conversation.
    pub model_id: String,

    /// Free-form model parameters (temperature, reasoning effort, ...).
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,

    /// Bumped whenever a message is added or a setting changes; used to sort
    /// the conversation list by recency.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Create an empty conversation ("new chat").
    pub fn new(title: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            model_id: model_id.into(),
            parameters: HashMap::new(),
            created_at: Utc::now(),
            last_activity_at: None,
        }
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.last_activity_at = Some(Utc::now());
    }

    /// Set a model parameter, bumping the activity timestamp.
    pub fn set_parameter(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.parameters.insert(key.into(), value);
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_conversation_is_empty_and_untouched() {
        let conv = Conversation::new("New chat", "gemini-2.5-flash");
        assert_eq!(conv.title, "New chat");
        assert!(conv.parameters.is_empty());
        assert!(conv.last_activity_at.is_none());
    }

    #[test]
    fn set_parameter_touches_activity() {
        let mut conv = Conversation::new("t", "m");
        conv.set_parameter("temperature", serde_json::json!(0.7));
        assert!(conv.last_activity_at.is_some());
        assert_eq!(
            conv.parameters.get("temperature"),
            Some(&serde_json::json!(0.7))
        );
    }
}
