//! ChatSession - Conversation Session Controller
//!
//! Owns the in-memory snapshot of one conversation for rendering purposes;
//! the store stays the durable owner of record. Local edits are applied
//! optimistically so sends and regenerations feel instantaneous, then
//! reconciled when the store's own snapshot arrives: the store wins on
//! conflict, and an optimistic entry is dropped once the store's copy of the
//! same id appears.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chat_core::{Message, MessagePatch};
use conversation_tree::{self as tree, Direction, StructuralIssue};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::completion::{CompletionClient, CompletionEvent, Turn};
use crate::error::{Result, SessionError};
use crate::machine::{StateMachine, TurnEvent, TurnState};
use crate::store::{MessageStore, UnsubscribeGuard};

/// The disposable local view of the conversation: the last confirmed store
/// snapshot plus the optimistic overlay, always rebuildable from the store.
#[derive(Default)]
struct SessionState {
    /// Last snapshot delivered by the store's change feed.
    confirmed: HashMap<Uuid, Message>,
    /// Local writes not yet echoed by the store. Overrides `confirmed` until
    /// the next snapshot, at which point the store's copy wins.
    optimistic: HashMap<Uuid, Message>,
    /// The message a completion is currently streaming into. Survives
    /// snapshot pruning so mid-stream content is never clobbered by a stale
    /// echo; cleared at finalization.
    in_progress: Option<Message>,
}

impl SessionState {
    fn effective(&self) -> Vec<Message> {
        let mut merged: HashMap<Uuid, Message> = self.confirmed.clone();
        for (id, message) in &self.optimistic {
            merged.insert(*id, message.clone());
        }
        if let Some(message) = &self.in_progress {
            merged.insert(message.id, message.clone());
        }
        merged.into_values().collect()
    }

    fn apply_snapshot(&mut self, snapshot: Vec<Message>) {
        self.confirmed = snapshot.into_iter().map(|m| (m.id, m)).collect();
        self.optimistic.retain(|id, _| !self.confirmed.contains_key(id));
    }
}

/// Releases the single-turn slot when the operation ends, however it ends.
struct TurnGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates the tree navigator and branch mutator against a live,
/// continuously-updated message collection.
pub struct ChatSession {
    conversation_id: Uuid,
    store: Arc<dyn MessageStore>,
    completion: Arc<dyn CompletionClient>,
    state: Arc<Mutex<SessionState>>,
    machine: Arc<Mutex<StateMachine>>,
    /// Exactly one completion streams per conversation at a time.
    in_flight: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
    path_tx: watch::Sender<Vec<Message>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    guard: Mutex<Option<UnsubscribeGuard>>,
}

impl ChatSession {
    /// Open a session over one conversation, subscribing to the store's
    /// change feed.
    pub fn open(
        conversation_id: Uuid,
        store: Arc<dyn MessageStore>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        let (mut receiver, guard) = store.subscribe(conversation_id).into_parts();
        let state: Arc<Mutex<SessionState>> = Arc::default();
        let (path_tx, _path_rx) = watch::channel(Vec::new());

        let listener_state = Arc::clone(&state);
        let listener_tx = path_tx.clone();
        let listener = tokio::spawn(async move {
            while let Some(snapshot) = receiver.recv().await {
                tracing::debug!(
                    %conversation_id,
                    message_count = snapshot.len(),
                    "store snapshot received"
                );
                let path = {
                    let mut state = listener_state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    state.apply_snapshot(snapshot);
                    tree::active_branch(&state.effective())
                };
                listener_tx.send_replace(path);
            }
            tracing::debug!(%conversation_id, "store change feed closed");
        });

        Self {
            conversation_id,
            store,
            completion,
            state,
            machine: Arc::new(Mutex::new(StateMachine::new())),
            in_flight: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
            path_tx,
            listener: Mutex::new(Some(listener)),
            guard: Mutex::new(Some(guard)),
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// The active root-to-leaf path currently rendered.
    pub fn active_path(&self) -> Vec<Message> {
        self.path_tx.borrow().clone()
    }

    /// Watch the active path as it changes; for the rendering layer.
    pub fn watch_path(&self) -> watch::Receiver<Vec<Message>> {
        self.path_tx.subscribe()
    }

    /// The full effective snapshot (confirmed + optimistic).
    pub fn snapshot(&self) -> Vec<Message> {
        self.lock_state().effective()
    }

    pub fn turn_state(&self) -> TurnState {
        self.lock(&self.machine).state().clone()
    }

    /// Structural defects in the current snapshot, for diagnostics surfaces.
    pub fn audit(&self) -> Vec<StructuralIssue> {
        tree::audit(&self.snapshot())
    }

    /// Where `message_id` sits among its sibling alternates, if it has any.
    pub fn branch_position(&self, message_id: Uuid) -> Option<tree::BranchPosition> {
        tree::branch_position(&self.snapshot(), message_id)
    }

    /// Send a new user message at the current leaf and stream the reply.
    /// Returns the id of the finalized assistant message.
    pub async fn send_user_message(&self, text: impl Into<String>) -> Result<Uuid> {
        let turn = self.begin_turn()?;
        let snapshot = self.snapshot();
        let leaf = tree::active_branch(&snapshot).last().map(|m| m.id);

        let user = Message::user(text, leaf).selected();
        tracing::info!(
            conversation_id = %self.conversation_id,
            message_id = %user.id,
            parent_id = ?leaf,
            "sending user message"
        );
        self.create_with_rollback(user.clone()).await?;

        let turns = self.active_turns();
        self.run_completion(turn, turns, Some(user.id)).await
    }

    /// Regenerate an assistant message as a new sibling alternate.
    pub async fn regenerate(&self, assistant_message_id: Uuid) -> Result<Uuid> {
        let turn = self.begin_turn()?;
        let snapshot = self.snapshot();
        let effect = tree::regenerate_from(&snapshot, assistant_message_id)?;
        tracing::info!(
            conversation_id = %self.conversation_id,
            message_id = %assistant_message_id,
            context_len = effect.context.len(),
            "regenerating assistant message"
        );
        let turns = effect.context.iter().map(Turn::from).collect();
        self.run_completion(turn, turns, effect.parent_id).await
    }

    /// Branch off a user message with new content and stream the reply. The
    /// original message stays reachable through sibling navigation.
    pub async fn edit_and_resend(
        &self,
        user_message_id: Uuid,
        new_content: impl Into<String>,
    ) -> Result<Uuid> {
        let turn = self.begin_turn()?;
        let snapshot = self.snapshot();
        let effect = tree::edit_and_resend(&snapshot, user_message_id, new_content)?;

        let user = Message::user(effect.content.clone(), effect.parent_id).selected();
        tracing::info!(
            conversation_id = %self.conversation_id,
            edited_id = %user_message_id,
            message_id = %user.id,
            "edit-and-resend branches at the edited message's parent"
        );
        self.create_with_rollback(user.clone()).await?;

        let turns = self.active_turns();
        self.run_completion(turn, turns, Some(user.id)).await
    }

    /// Step to a sibling alternate. A boundary step reaffirms the current
    /// selection (idempotent no-op). Allowed while a turn is streaming.
    pub async fn switch_branch(&self, message_id: Uuid, direction: Direction) -> Result<Uuid> {
        let snapshot = self.snapshot();
        let effect = tree::select_sibling(&snapshot, message_id, direction)?;
        let patch = MessagePatch::selection(effect.selected_at);

        let previous = {
            let mut state = self.lock_state();
            let base = state
                .optimistic
                .get(&effect.target_id)
                .or_else(|| state.confirmed.get(&effect.target_id))
                .cloned();
            match base {
                Some(mut message) => {
                    let previous = state.optimistic.get(&effect.target_id).cloned();
                    patch.apply(&mut message);
                    state.optimistic.insert(effect.target_id, message);
                    previous
                }
                None => return Err(SessionError::NotFound(effect.target_id)),
            }
        };
        self.publish();

        if let Err(err) = self
            .store
            .update_message_fields(self.conversation_id, effect.target_id, patch)
            .await
        {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                message_id = %effect.target_id,
                error = %err,
                "branch switch write failed, rolling back"
            );
            let mut state = self.lock_state();
            match previous {
                Some(message) => {
                    state.optimistic.insert(effect.target_id, message);
                }
                None => {
                    state.optimistic.remove(&effect.target_id);
                }
            }
            drop(state);
            self.publish();
            return Err(err);
        }

        self.publish();
        Ok(effect.target_id)
    }

    /// Delete everything after `message_id`, keeping it as the new leaf.
    /// Returns the ids that were deleted.
    pub async fn truncate_after(&self, message_id: Uuid) -> Result<HashSet<Uuid>> {
        let snapshot = self.snapshot();
        let doomed = tree::truncate_after(&snapshot, message_id)?;
        if doomed.is_empty() {
            return Ok(doomed);
        }
        tracing::info!(
            conversation_id = %self.conversation_id,
            message_id = %message_id,
            count = doomed.len(),
            "truncating subtree"
        );
        self.delete_with_rollback(&doomed).await?;
        Ok(doomed)
    }

    /// Delete the whole conversation's message tree (cascading).
    pub async fn delete_conversation(&self) -> Result<()> {
        let _turn = self.begin_turn()?;
        let ids: HashSet<Uuid> = self.snapshot().iter().map(|m| m.id).collect();
        if ids.is_empty() {
            return Ok(());
        }
        self.delete_with_rollback(&ids).await
    }

    /// Cancel the in-flight completion, if any. The partially-streamed
    /// message is finalized with whatever content arrived.
    pub fn cancel_streaming(&self) {
        if let Some(token) = self.lock(&self.cancel).as_ref() {
            tracing::info!(conversation_id = %self.conversation_id, "cancelling in-flight turn");
            token.cancel();
        }
    }

    /// Tear down the store subscription. The unsubscribe handle is invoked
    /// exactly once, here or on drop, whichever happens first.
    pub fn close(&self) {
        if let Some(listener) = self.lock(&self.listener).take() {
            listener.abort();
        }
        if let Some(guard) = self.lock(&self.guard).take() {
            guard.unsubscribe();
        }
    }

    // ---- internals ----

    fn begin_turn(&self) -> Result<TurnGuard> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                "operation rejected: still generating"
            );
            return Err(SessionError::StillGenerating);
        }
        Ok(TurnGuard {
            flag: Arc::clone(&self.in_flight),
        })
    }

    /// Turns for the completion API: the current active branch, which after
    /// a user-message insert ends at that (newest, selected) message.
    fn active_turns(&self) -> Vec<Turn> {
        tree::active_branch(&self.snapshot())
            .iter()
            .map(Turn::from)
            .collect()
    }

    async fn create_with_rollback(&self, message: Message) -> Result<()> {
        {
            let mut state = self.lock_state();
            state.optimistic.insert(message.id, message.clone());
        }
        self.publish();

        if let Err(err) = self.store.create_message(self.conversation_id, message.clone()).await {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                message_id = %message.id,
                error = %err,
                "create failed, rolling back optimistic insert"
            );
            self.lock_state().optimistic.remove(&message.id);
            self.publish();
            return Err(err);
        }
        Ok(())
    }

    async fn delete_with_rollback(&self, ids: &HashSet<Uuid>) -> Result<()> {
        let removed: Vec<Message> = {
            let mut state = self.lock_state();
            let mut removed = Vec::new();
            for id in ids {
                if let Some(message) = state.optimistic.remove(id) {
                    removed.push(message);
                }
                if let Some(message) = state.confirmed.remove(id) {
                    removed.push(message);
                }
            }
            removed
        };
        self.publish();

        if let Err(err) = self.store.delete_messages(self.conversation_id, ids).await {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                count = ids.len(),
                error = %err,
                "delete failed, restoring snapshot entries"
            );
            let mut state = self.lock_state();
            for message in removed {
                state.confirmed.insert(message.id, message);
            }
            drop(state);
            self.publish();
            return Err(err);
        }
        Ok(())
    }

    /// Create the assistant message, stream the completion into it, and
    /// finalize. The turn guard is held for the whole fold.
    async fn run_completion(
        &self,
        turn: TurnGuard,
        turns: Vec<Turn>,
        parent_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let _turn = turn;
        self.transition(TurnEvent::TurnStarted);

        let assistant = Message::assistant(parent_id).selected();
        let assistant_id = assistant.id;
        {
            self.lock_state().in_progress = Some(assistant.clone());
        }
        self.publish();

        if let Err(err) = self
            .store
            .create_message(self.conversation_id, assistant.clone())
            .await
        {
            self.lock_state().in_progress = None;
            self.publish();
            self.transition(TurnEvent::StreamFailed {
                error: err.to_string(),
            });
            return Err(err);
        }

        let token = CancellationToken::new();
        *self.lock(&self.cancel) = Some(token.clone());

        let mut content = String::new();
        let mut thinking = String::new();
        let mut media = None;
        let mut usage = None;
        let mut stream_error: Option<String> = None;
        let mut cancelled = false;

        match self.completion.stream_completion(turns).await {
            Ok(mut stream) => {
                let mut started = false;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => {
                            cancelled = true;
                            break;
                        }
                        event = stream.next() => match event {
                            Some(CompletionEvent::TextDelta(delta)) => {
                                self.transition(if started {
                                    TurnEvent::DeltaReceived
                                } else {
                                    TurnEvent::StreamStarted
                                });
                                started = true;
                                content.push_str(&delta);
                                self.overwrite_in_progress(&content, &thinking);
                            }
                            Some(CompletionEvent::ThinkingDelta(delta)) => {
                                self.transition(if started {
                                    TurnEvent::DeltaReceived
                                } else {
                                    TurnEvent::StreamStarted
                                });
                                started = true;
                                thinking.push_str(&delta);
                                self.overwrite_in_progress(&content, &thinking);
                            }
                            Some(CompletionEvent::InlineMedia(media_ref)) => {
                                media = Some(media_ref);
                            }
                            Some(CompletionEvent::Usage(counts)) => {
                                usage = Some(counts);
                            }
                            Some(CompletionEvent::Error(error)) => {
                                stream_error = Some(error);
                                break;
                            }
                            Some(CompletionEvent::Done) | None => break,
                        }
                    }
                }
            }
            Err(err) => {
                stream_error = Some(err.to_string());
            }
        }

        *self.lock(&self.cancel) = None;

        // A failed stream stays visible in the branch: keep the partial
        // content and append the error text, never drop the message.
        if let Some(error) = &stream_error {
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str("[error: ");
            content.push_str(error);
            content.push(']');
        }

        let patch = MessagePatch {
            content: Some(content),
            selected_at: None,
            thinking: (!thinking.is_empty()).then_some(thinking),
            media,
            usage,
        };

        {
            let mut state = self.lock_state();
            let mut finalized = assistant;
            patch.apply(&mut finalized);
            state.in_progress = None;
            state.optimistic.insert(assistant_id, finalized);
        }
        self.publish();

        let write_result = self
            .store
            .update_message_fields(self.conversation_id, assistant_id, patch)
            .await;

        match (&stream_error, cancelled) {
            (Some(error), _) => self.transition(TurnEvent::StreamFailed {
                error: error.clone(),
            }),
            (None, true) => self.transition(TurnEvent::Cancelled),
            (None, false) => self.transition(TurnEvent::StreamCompleted),
        }

        tracing::info!(
            conversation_id = %self.conversation_id,
            message_id = %assistant_id,
            cancelled,
            errored = stream_error.is_some(),
            "assistant turn finalized"
        );

        // The local copy keeps the streamed content either way; if this
        // write failed the next store snapshot wins, per the reconciliation
        // contract.
        write_result?;
        if let Some(error) = stream_error {
            return Err(SessionError::Stream(error));
        }
        Ok(assistant_id)
    }

    fn overwrite_in_progress(&self, content: &str, thinking: &str) {
        {
            let mut state = self.lock_state();
            if let Some(message) = state.in_progress.as_mut() {
                message.content = content.to_string();
                if !thinking.is_empty() {
                    message.thinking = Some(thinking.to_string());
                }
            }
        }
        self.publish();
    }

    fn transition(&self, event: TurnEvent) {
        let transition = self.lock(&self.machine).handle_event(event);
        if transition.changed {
            tracing::debug!(
                conversation_id = %self.conversation_id,
                from = ?transition.from,
                to = ?transition.to,
                "turn state changed"
            );
        }
    }

    fn publish(&self) {
        let path = tree::active_branch(&self.lock_state().effective());
        self.path_tx.send_replace(path);
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.lock(&self.state)
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}
