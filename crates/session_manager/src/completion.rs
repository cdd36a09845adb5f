//! Completion stream contract
//!
//! The seam to the chat-completion API. The transport (HTTP/SSE, a proxy, a
//! local model) is out of scope; the controller only consumes an async
//! sequence of events and folds text/thinking deltas into the in-progress
//! message until `Done` or `Error`.

use async_trait::async_trait;
use chat_core::{MediaRef, Message, Role, UsageCounts};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One role/content turn of the context sent to the completion API.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for Turn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// An event yielded by an in-flight completion.
#[derive(Clone, Debug, PartialEq)]
pub enum CompletionEvent {
    /// A fragment of the answer text.
    TextDelta(String),
    /// A fragment of the model's "thinking" text.
    ThinkingDelta(String),
    /// Inline media produced by the model.
    InlineMedia(MediaRef),
    /// Token accounting for the turn.
    Usage(UsageCounts),
    /// The stream failed; the partial content remains a legitimate leaf.
    Error(String),
    /// The stream completed normally.
    Done,
}

pub type CompletionStream = BoxStream<'static, CompletionEvent>;

/// Client capable of streaming a chat completion for an ordered context.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn stream_completion(&self, turns: Vec<Turn>) -> Result<CompletionStream>;
}
