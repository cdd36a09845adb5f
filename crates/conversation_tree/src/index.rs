//! ChildIndex - Per-snapshot parent/children index
//!
//! The navigator needs "children of node X" at every step of a walk.
//! Recomputing that by filtering the full slice works at conversation sizes,
//! but building the index once per snapshot keeps every navigator call O(1)
//! per step and lets callers batch several queries against one snapshot.

use std::cmp::Ordering;
use std::collections::HashMap;

use chat_core::Message;
use uuid::Uuid;

/// Ordering shared by every sibling computation:
/// `selected_at` descending with `None` last, then `created_at` descending,
/// then `id` ascending for determinism.
///
/// The first element under this ordering is the active sibling at a fork.
pub(crate) fn sibling_cmp(a: &Message, b: &Message) -> Ordering {
    b.selected_at
        .cmp(&a.selected_at)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Index over one immutable snapshot of a conversation's messages.
pub struct ChildIndex<'a> {
    by_id: HashMap<Uuid, &'a Message>,
    children: HashMap<Uuid, Vec<&'a Message>>,
    roots: Vec<&'a Message>,
}

impl<'a> ChildIndex<'a> {
    pub fn new(messages: &'a [Message]) -> Self {
        let mut by_id = HashMap::with_capacity(messages.len());
        let mut children: HashMap<Uuid, Vec<&'a Message>> = HashMap::new();
        let mut roots = Vec::new();

        for message in messages {
            by_id.insert(message.id, message);
            match message.parent_id {
                Some(parent_id) => children.entry(parent_id).or_default().push(message),
                None => roots.push(message),
            }
        }

        Self {
            by_id,
            children,
            roots,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&'a Message> {
        self.by_id.get(&id).copied()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.by_id.contains_key(&id)
    }

    /// All messages whose `parent_id` is `id`, in snapshot order.
    pub fn children_of(&self, id: Uuid) -> &[&'a Message] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Messages with no parent, in snapshot order.
    pub fn roots(&self) -> &[&'a Message] {
        &self.roots
    }

    /// The root the navigator starts from: latest `created_at` wins when
    /// several roots exist (data races can produce more than one), with `id`
    /// as the deterministic tie-break.
    pub fn primary_root(&self) -> Option<&'a Message> {
        self.roots
            .iter()
            .copied()
            .min_by(|a, b| sibling_cmp_by_creation(a, b))
    }

    /// The sibling set of `message`: every message sharing its `parent_id`
    /// and `role` (including itself), in sibling order.
    pub fn sibling_set(&self, message: &Message) -> Vec<&'a Message> {
        let candidates: Vec<&'a Message> = match message.parent_id {
            Some(parent_id) => self.children_of(parent_id).to_vec(),
            None => self.roots.clone(),
        };
        let mut set: Vec<&'a Message> = candidates
            .into_iter()
            .filter(|m| m.role == message.role)
            .collect();
        set.sort_by(|a, b| sibling_cmp(a, b));
        set
    }

    /// Children of `parent` eligible to continue the branch: opposite role
    /// only, in sibling order.
    pub fn branch_children(&self, parent: &Message) -> Vec<&'a Message> {
        let mut set: Vec<&'a Message> = self
            .children_of(parent.id)
            .iter()
            .copied()
            .filter(|m| m.role == parent.role.opposite())
            .collect();
        set.sort_by(|a, b| sibling_cmp(a, b));
        set
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Creation-recency ordering used for root selection (no `selected_at`
/// involved: roots are picked purely by latest `created_at`).
fn sibling_cmp_by_creation(a: &Message, b: &Message) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::Role;
    use chrono::{TimeZone, Utc};

    fn msg(n: u128, role: Role, parent: Option<u128>, created: i64) -> Message {
        Message {
            id: Uuid::from_u128(n),
            role,
            content: format!("m{n}"),
            created_at: Utc.timestamp_opt(created, 0).unwrap(),
            selected_at: None,
            parent_id: parent.map(Uuid::from_u128),
            thinking: None,
            media: None,
            usage: None,
        }
    }

    #[test]
    fn indexes_children_and_roots() {
        let messages = vec![
            msg(1, Role::User, None, 0),
            msg(2, Role::Assistant, Some(1), 1),
            msg(3, Role::Assistant, Some(1), 2),
        ];
        let index = ChildIndex::new(&messages);

        assert_eq!(index.roots().len(), 1);
        assert_eq!(index.children_of(Uuid::from_u128(1)).len(), 2);
        assert!(index.children_of(Uuid::from_u128(2)).is_empty());
    }

    #[test]
    fn primary_root_is_latest_created() {
        let messages = vec![msg(1, Role::User, None, 0), msg(2, Role::User, None, 5)];
        let index = ChildIndex::new(&messages);
        assert_eq!(index.primary_root().unwrap().id, Uuid::from_u128(2));
    }

    #[test]
    fn sibling_set_filters_by_role() {
        let messages = vec![
            msg(1, Role::User, None, 0),
            msg(2, Role::Assistant, Some(1), 1),
            // A user edit shares the parent but is not a sibling of the
            // assistant replies.
            msg(3, Role::User, Some(1), 2),
            msg(4, Role::Assistant, Some(1), 3),
        ];
        let index = ChildIndex::new(&messages);

        let set = index.sibling_set(&messages[1]);
        let ids: Vec<Uuid> = set.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(4), Uuid::from_u128(2)]);
    }
}
