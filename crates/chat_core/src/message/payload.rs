//! Opaque message payloads
//!
//! Auxiliary data carried on a message that the tree logic never consults:
//! media attachments, token usage, and model "thinking" text live here.

use serde::{Deserialize, Serialize};

/// Reference to an inline media attachment (image, audio).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MediaRef {
    /// Storage URL or data URI for the attachment.
    pub url: String,
    /// MIME type, when the producer reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl MediaRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Token usage reported by the completion API for one assistant turn.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsageCounts {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}
