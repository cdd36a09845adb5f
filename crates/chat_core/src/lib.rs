//! chat_core - Core types for the branching chat system
//!
//! This crate provides the foundational types used across all chat-related crates:
//! - `message` - Message nodes, roles, and opaque payload types
//! - `conversation` - Conversation container and configuration

pub mod conversation;
pub mod message;

// Re-export commonly used types
pub use conversation::Conversation;
pub use message::{MediaRef, Message, MessagePatch, Role, UsageCounts};
