//! Role - The two participants of a conversation branch

use serde::{Deserialize, Serialize};

/// Who authored a message.
///
/// A well-formed branch strictly alternates between the two variants, so the
/// navigator walks from a node to children of the *opposite* role. Keeping
/// this closed (no free-form strings) lets the alternation logic be checked
/// exhaustively.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// The role that follows this one on a well-formed branch.
    pub fn opposite(self) -> Self {
        match self {
            Self::User => Self::Assistant,
            Self::Assistant => Self::User,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
