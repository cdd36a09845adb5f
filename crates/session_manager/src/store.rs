//! Message store contract and in-memory reference implementation
//!
//! The store is the durable owner of record for a conversation's messages.
//! Reads are push-based with snapshot semantics: every change delivers the
//! *full* current message set, never a delta, so the navigator always sees a
//! complete collection. Writes are the three primitives the branch mutator's
//! effects map onto.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use chat_core::{Message, MessagePatch};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Result, SessionError};

/// Write + subscribe contract for a conversation-scoped message collection.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(&self, conversation_id: Uuid, message: Message) -> Result<()>;

    async fn update_message_fields(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        patch: MessagePatch,
    ) -> Result<()>;

    /// Delete the given ids. Ids already absent are ignored, so a cascading
    /// delete that races a concurrent delete still succeeds.
    async fn delete_messages(&self, conversation_id: Uuid, ids: &HashSet<Uuid>) -> Result<()>;

    /// Subscribe to snapshot updates for one conversation. The current
    /// snapshot is delivered immediately, then again after every change.
    fn subscribe(&self, conversation_id: Uuid) -> StoreSubscription;
}

/// Handle that detaches a subscriber from the store's change feed.
///
/// The teardown action runs exactly once: either through an explicit
/// [`UnsubscribeGuard::unsubscribe`] call or on drop, whichever comes first.
pub struct UnsubscribeGuard {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl UnsubscribeGuard {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// A guard that does nothing on teardown.
    pub fn noop() -> Self {
        Self { action: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl Drop for UnsubscribeGuard {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl std::fmt::Debug for UnsubscribeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnsubscribeGuard")
            .field("armed", &self.action.is_some())
            .finish()
    }
}

/// A live subscription: snapshot receiver plus its teardown guard.
pub struct StoreSubscription {
    receiver: mpsc::UnboundedReceiver<Vec<Message>>,
    guard: UnsubscribeGuard,
}

impl StoreSubscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<Vec<Message>>, guard: UnsubscribeGuard) -> Self {
        Self { receiver, guard }
    }

    /// Await the next full snapshot; `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<Vec<Message>> {
        self.receiver.recv().await
    }

    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<Vec<Message>>, UnsubscribeGuard) {
        (self.receiver, self.guard)
    }
}

#[derive(Default)]
struct StoreInner {
    conversations: HashMap<Uuid, HashMap<Uuid, Message>>,
    subscribers: HashMap<Uuid, HashMap<u64, mpsc::UnboundedSender<Vec<Message>>>>,
    next_subscriber_id: u64,
}

impl StoreInner {
    fn snapshot(&self, conversation_id: Uuid) -> Vec<Message> {
        self.conversations
            .get(&conversation_id)
            .map(|messages| messages.values().cloned().collect())
            .unwrap_or_default()
    }

    fn broadcast(&mut self, conversation_id: Uuid) {
        let snapshot = self.snapshot(conversation_id);
        if let Some(subscribers) = self.subscribers.get_mut(&conversation_id) {
            subscribers.retain(|_, sender| sender.send(snapshot.clone()).is_ok());
        }
    }
}

/// In-memory [`MessageStore`] with broadcast snapshot delivery.
///
/// The reference implementation used by the session tests; a real deployment
/// substitutes the document-store-backed implementation behind the same
/// trait (message encoding is the store's concern, not this crate's).
#[derive(Clone, Default)]
pub struct MemoryMessageStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current full snapshot for a conversation, for assertions and rebuilds.
    pub fn snapshot(&self, conversation_id: Uuid) -> Vec<Message> {
        self.lock().snapshot(conversation_id)
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create_message(&self, conversation_id: Uuid, message: Message) -> Result<()> {
        let mut inner = self.lock();
        tracing::debug!(
            %conversation_id,
            message_id = %message.id,
            role = %message.role,
            "store: create message"
        );
        inner
            .conversations
            .entry(conversation_id)
            .or_default()
            .insert(message.id, message);
        inner.broadcast(conversation_id);
        Ok(())
    }

    async fn update_message_fields(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        patch: MessagePatch,
    ) -> Result<()> {
        let mut inner = self.lock();
        let message = inner
            .conversations
            .get_mut(&conversation_id)
            .and_then(|messages| messages.get_mut(&message_id))
            .ok_or(SessionError::NotFound(message_id))?;
        patch.apply(message);
        inner.broadcast(conversation_id);
        Ok(())
    }

    async fn delete_messages(&self, conversation_id: Uuid, ids: &HashSet<Uuid>) -> Result<()> {
        let mut inner = self.lock();
        if let Some(messages) = inner.conversations.get_mut(&conversation_id) {
            messages.retain(|id, _| !ids.contains(id));
        }
        tracing::debug!(%conversation_id, count = ids.len(), "store: delete messages");
        inner.broadcast(conversation_id);
        Ok(())
    }

    fn subscribe(&self, conversation_id: Uuid) -> StoreSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscriber_id = {
            let mut inner = self.lock();
            let subscriber_id = inner.next_subscriber_id;
            inner.next_subscriber_id += 1;
            // Seed the new subscriber immediately so it starts from the
            // complete current set rather than waiting for the next change.
            let snapshot = inner.snapshot(conversation_id);
            let _ = sender.send(snapshot);
            inner
                .subscribers
                .entry(conversation_id)
                .or_default()
                .insert(subscriber_id, sender);
            subscriber_id
        };

        let weak: Weak<Mutex<StoreInner>> = Arc::downgrade(&self.inner);
        let guard = UnsubscribeGuard::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(subscribers) = inner.subscribers.get_mut(&conversation_id) {
                    subscribers.remove(&subscriber_id);
                }
            }
        });

        StoreSubscription::new(receiver, guard)
    }
}
