//! conversation_tree - Branching conversation model
//!
//! Messages form a tree via `parent_id` references rather than a flat log,
//! the way a version-control history lets one explore divergent commits.
//! This crate computes the single root-to-leaf path currently rendered (the
//! active branch), sibling sets and their ordering, and the effects of the
//! structural edits (regenerate, edit-and-resend, sibling switch, truncate).
//!
//! Everything here is a synchronous, side-effect-free computation over an
//! immutable snapshot of one conversation's messages: no I/O, safe to call
//! from any thread, deterministic given the snapshot. Mutations are returned
//! as effect descriptions for the caller to apply against whatever store
//! holds the messages.

pub mod error;
pub mod index;
pub mod mutator;
pub mod navigator;

// Re-export commonly used types
pub use error::{Result, TreeError};
pub use index::ChildIndex;
pub use mutator::{
    edit_and_resend, regenerate_from, select_sibling, truncate_after, Direction, RegenerateEffect,
    ResendEffect, SelectionEffect,
};
pub use navigator::{
    active_branch, ancestors_before, audit, branch_position, siblings, subtree_ids,
    BranchPosition, StructuralIssue,
};
