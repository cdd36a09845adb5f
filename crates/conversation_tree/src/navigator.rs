//! Tree Navigator - Pure queries over the message tree
//!
//! Computes the active conversation path, sibling sets, branch position
//! metadata and subtree membership from the flat message collection. No I/O;
//! fully deterministic given the snapshot.

use std::collections::{HashSet, VecDeque};

use chat_core::Message;
use serde::Serialize;
use uuid::Uuid;

use crate::index::ChildIndex;

/// Position of a message within its sibling set, for branch-navigation UI.
///
/// `index` is 0-based within the sibling ordering (newest selection first).
/// `has_previous` means an older/lower-ranked alternate exists later in the
/// ordering; `has_next` means a newer one exists earlier.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BranchPosition {
    pub index: usize,
    pub count: usize,
    pub has_previous: bool,
    pub has_next: bool,
}

/// A non-fatal defect found in the message graph.
///
/// These keep the conversation renderable instead of failing it: the
/// navigator stops descent at a dangling reference and breaks cycles with a
/// visited set, reporting what it saw.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralIssue {
    /// `parent_id` references a message absent from the snapshot.
    DanglingParent { id: Uuid, parent_id: Uuid },
    /// Following `parent_id` links from `id` re-enters the chain.
    Cycle { id: Uuid },
}

/// The single root-to-leaf path currently rendered.
///
/// Walks from the most recently created root, at each fork picking the child
/// of the opposite role with the newest `selected_at` (falling back to the
/// newest `created_at` when no child was ever selected). Returns an empty
/// path for an empty snapshot; never visits a node twice.
pub fn active_branch(messages: &[Message]) -> Vec<Message> {
    let index = ChildIndex::new(messages);
    active_branch_in(&index)
}

/// [`active_branch`] against a prebuilt snapshot index.
pub fn active_branch_in(index: &ChildIndex<'_>) -> Vec<Message> {
    let Some(root) = index.primary_root() else {
        return Vec::new();
    };

    let mut path = Vec::new();
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut current = root;

    loop {
        visited.insert(current.id);
        path.push(current.clone());

        let Some(child) = index.branch_children(current).into_iter().next() else {
            break;
        };
        if visited.contains(&child.id) {
            tracing::warn!(
                message_id = %child.id,
                parent_id = %current.id,
                "cycle detected while walking active branch, stopping descent"
            );
            break;
        }
        current = child;
    }

    path
}

/// All messages sharing `parent_id` and `role` with `message_id`, itself
/// included, in sibling order. Empty if the message is not in the snapshot.
pub fn siblings(messages: &[Message], message_id: Uuid) -> Vec<Message> {
    let index = ChildIndex::new(messages);
    siblings_in(&index, message_id)
}

/// [`siblings`] against a prebuilt snapshot index.
pub fn siblings_in(index: &ChildIndex<'_>, message_id: Uuid) -> Vec<Message> {
    let Some(message) = index.get(message_id) else {
        return Vec::new();
    };
    index
        .sibling_set(message)
        .into_iter()
        .cloned()
        .collect()
}

/// Where `message_id` sits among its siblings, or `None` when it has no
/// navigable alternates (absent from the snapshot, or a lone member).
pub fn branch_position(messages: &[Message], message_id: Uuid) -> Option<BranchPosition> {
    let index = ChildIndex::new(messages);
    branch_position_in(&index, message_id)
}

/// [`branch_position`] against a prebuilt snapshot index.
pub fn branch_position_in(index: &ChildIndex<'_>, message_id: Uuid) -> Option<BranchPosition> {
    let set = siblings_in(index, message_id);
    if set.len() < 2 {
        return None;
    }
    let position = set.iter().position(|m| m.id == message_id)?;
    Some(BranchPosition {
        index: position,
        count: set.len(),
        has_previous: position + 1 < set.len(),
        has_next: position > 0,
    })
}

/// The prefix of the active branch strictly before `message_id`.
///
/// Empty when the message is the root or not on the current active branch.
/// Used to build "context so far" when regenerating from a point.
pub fn ancestors_before(messages: &[Message], message_id: Uuid) -> Vec<Message> {
    let index = ChildIndex::new(messages);
    ancestors_before_in(&index, message_id)
}

/// [`ancestors_before`] against a prebuilt snapshot index.
pub fn ancestors_before_in(index: &ChildIndex<'_>, message_id: Uuid) -> Vec<Message> {
    let mut path = active_branch_in(index);
    match path.iter().position(|m| m.id == message_id) {
        Some(position) => {
            path.truncate(position);
            path
        }
        None => Vec::new(),
    }
}

/// Every message transitively below `parent_id` (not including `parent_id`
/// itself), across both roles. This is the cascading-delete target set.
pub fn subtree_ids(messages: &[Message], parent_id: Uuid) -> HashSet<Uuid> {
    let index = ChildIndex::new(messages);
    subtree_ids_in(&index, parent_id)
}

/// [`subtree_ids`] against a prebuilt snapshot index.
pub fn subtree_ids_in(index: &ChildIndex<'_>, parent_id: Uuid) -> HashSet<Uuid> {
    let mut result = HashSet::new();
    let mut queue: VecDeque<Uuid> = VecDeque::new();
    queue.push_back(parent_id);

    while let Some(current) = queue.pop_front() {
        for child in index.children_of(current) {
            // The visited guard doubles as cycle protection.
            if child.id != parent_id && result.insert(child.id) {
                queue.push_back(child.id);
            }
        }
    }

    result
}

/// Scan the snapshot for structural defects without failing on any of them.
pub fn audit(messages: &[Message]) -> Vec<StructuralIssue> {
    let index = ChildIndex::new(messages);
    let mut issues = Vec::new();

    for message in messages {
        if let Some(parent_id) = message.parent_id {
            if !index.contains(parent_id) {
                tracing::warn!(
                    message_id = %message.id,
                    parent_id = %parent_id,
                    "dangling parent reference"
                );
                issues.push(StructuralIssue::DanglingParent {
                    id: message.id,
                    parent_id,
                });
            }
        }
    }

    // Chase parent chains; memoize nodes already proven to terminate so the
    // scan stays linear-ish, and report each cycle once at its entry node.
    let mut resolved: HashSet<Uuid> = HashSet::new();
    let mut known_cyclic: HashSet<Uuid> = HashSet::new();
    for message in messages {
        if resolved.contains(&message.id) || known_cyclic.contains(&message.id) {
            continue;
        }
        let mut chain: Vec<Uuid> = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut current = Some(message);
        let mut cycle_entry: Option<Uuid> = None;

        while let Some(node) = current {
            if resolved.contains(&node.id) || known_cyclic.contains(&node.id) {
                break;
            }
            if !seen.insert(node.id) {
                cycle_entry = Some(node.id);
                break;
            }
            chain.push(node.id);
            current = node.parent_id.and_then(|pid| index.get(pid));
        }

        if let Some(entry) = cycle_entry {
            let start = chain.iter().position(|&id| id == entry).unwrap_or(0);
            for &id in &chain[start..] {
                known_cyclic.insert(id);
            }
            tracing::warn!(message_id = %entry, "parent chain forms a cycle");
            issues.push(StructuralIssue::Cycle { id: entry });
        }
        for id in chain {
            resolved.insert(id);
        }
    }

    issues
}
