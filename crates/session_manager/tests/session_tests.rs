//! Integration tests for the session controller: optimistic echo, streaming
//! fold, single in-flight enforcement, rollback, cancellation, truncation.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chat_core::{Message, MessagePatch, Role, UsageCounts};
use conversation_tree::Direction;
use futures::StreamExt;
use session_manager::{
    ChatSession, CompletionClient, CompletionEvent, CompletionStream, MemoryMessageStore,
    MessageStore, Result, SessionError, TurnState,
};
use tokio::sync::Notify;
use uuid::Uuid;

/// Replays one scripted event list per call; `[Done]` once exhausted.
struct ScriptedCompletion {
    scripts: Mutex<VecDeque<Vec<CompletionEvent>>>,
}

impl ScriptedCompletion {
    fn new(scripts: Vec<Vec<CompletionEvent>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
        })
    }

    fn answering(text: &str) -> Arc<Self> {
        Self::new(vec![vec![
            CompletionEvent::TextDelta(text.to_string()),
            CompletionEvent::Done,
        ]])
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn stream_completion(&self, _turns: Vec<session_manager::Turn>) -> Result<CompletionStream> {
        let events = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![CompletionEvent::Done]);
        Ok(futures::stream::iter(events).boxed())
    }
}

/// Yields one delta, then stalls until released (or cancelled).
struct BlockedCompletion {
    release: Arc<Notify>,
}

#[async_trait]
impl CompletionClient for BlockedCompletion {
    async fn stream_completion(&self, _turns: Vec<session_manager::Turn>) -> Result<CompletionStream> {
        let release = Arc::clone(&self.release);
        let stream = async_stream::stream! {
            yield CompletionEvent::TextDelta("partial".to_string());
            release.notified().await;
            yield CompletionEvent::Done;
        };
        Ok(stream.boxed())
    }
}

/// Store wrapper that injects write failures on demand.
struct FailingStore {
    inner: MemoryMessageStore,
    fail_creates: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FailingStore {
    fn new(inner: MemoryMessageStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_creates: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl MessageStore for FailingStore {
    async fn create_message(&self, conversation_id: Uuid, message: Message) -> Result<()> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(SessionError::StoreWrite("injected create failure".to_string()));
        }
        self.inner.create_message(conversation_id, message).await
    }

    async fn update_message_fields(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        patch: MessagePatch,
    ) -> Result<()> {
        self.inner
            .update_message_fields(conversation_id, message_id, patch)
            .await
    }

    async fn delete_messages(&self, conversation_id: Uuid, ids: &HashSet<Uuid>) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(SessionError::StoreWrite("injected delete failure".to_string()));
        }
        self.inner.delete_messages(conversation_id, ids).await
    }

    fn subscribe(&self, conversation_id: Uuid) -> session_manager::StoreSubscription {
        self.inner.subscribe(conversation_id)
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn open_session(
    store: &MemoryMessageStore,
    completion: Arc<dyn CompletionClient>,
) -> (Arc<ChatSession>, Uuid) {
    let conversation_id = Uuid::new_v4();
    let session = Arc::new(ChatSession::open(
        conversation_id,
        Arc::new(store.clone()),
        completion,
    ));
    (session, conversation_id)
}

#[tokio::test]
async fn send_folds_the_stream_into_one_assistant_leaf() {
    let store = MemoryMessageStore::new();
    let completion = ScriptedCompletion::new(vec![vec![
        CompletionEvent::TextDelta("Hel".to_string()),
        CompletionEvent::TextDelta("lo".to_string()),
        CompletionEvent::ThinkingDelta("considering".to_string()),
        CompletionEvent::Usage(UsageCounts {
            prompt_tokens: 12,
            completion_tokens: 2,
        }),
        CompletionEvent::Done,
    ]]);
    let (session, conversation_id) = open_session(&store, completion);

    let assistant_id = session.send_user_message("hi there").await.unwrap();

    let path = session.active_path();
    assert_eq!(path.len(), 2);
    assert_eq!(path[0].role, Role::User);
    assert_eq!(path[0].content, "hi there");
    assert_eq!(path[1].id, assistant_id);
    assert_eq!(path[1].content, "Hello");
    assert_eq!(path[1].thinking.as_deref(), Some("considering"));
    assert_eq!(path[1].usage.map(|u| u.prompt_tokens), Some(12));
    assert_eq!(session.turn_state(), TurnState::Finalized);

    // The store holds the same finalized tree.
    let stored = store.snapshot(conversation_id);
    assert_eq!(stored.len(), 2);
    let stored_assistant = stored.iter().find(|m| m.id == assistant_id).unwrap();
    assert_eq!(stored_assistant.content, "Hello");
}

#[tokio::test]
async fn optimistic_entries_reconcile_with_the_store_snapshot() {
    let store = MemoryMessageStore::new();
    let (session, conversation_id) = open_session(&store, ScriptedCompletion::answering("ok"));

    session.send_user_message("first").await.unwrap();

    // Once the listener catches up, the local view and the store agree
    // message for message.
    let store_for_check = store.clone();
    eventually(move || {
        let mut local: Vec<Uuid> = session.snapshot().iter().map(|m| m.id).collect();
        let mut stored: Vec<Uuid> = store_for_check
            .snapshot(conversation_id)
            .iter()
            .map(|m| m.id)
            .collect();
        local.sort();
        stored.sort();
        local == stored && local.len() == 2
    })
    .await;
}

#[tokio::test]
async fn second_send_is_rejected_while_streaming() {
    let store = MemoryMessageStore::new();
    let release = Arc::new(Notify::new());
    let completion = Arc::new(BlockedCompletion {
        release: Arc::clone(&release),
    });
    let (session, _) = open_session(&store, completion);

    let sender = Arc::clone(&session);
    let first = tokio::spawn(async move { sender.send_user_message("question").await });

    let waiter = Arc::clone(&session);
    eventually(move || waiter.turn_state() == TurnState::Streaming).await;

    let err = session.send_user_message("impatient follow-up").await.unwrap_err();
    assert_eq!(err, SessionError::StillGenerating);

    release.notify_one();
    first.await.unwrap().unwrap();
    assert_eq!(session.turn_state(), TurnState::Finalized);
}

#[tokio::test]
async fn regenerate_creates_a_selected_sibling() {
    let store = MemoryMessageStore::new();
    let completion = ScriptedCompletion::new(vec![
        vec![
            CompletionEvent::TextDelta("first answer".to_string()),
            CompletionEvent::Done,
        ],
        vec![
            CompletionEvent::TextDelta("better answer".to_string()),
            CompletionEvent::Done,
        ],
    ]);
    let (session, _) = open_session(&store, completion);

    let first_id = session.send_user_message("question").await.unwrap();
    let second_id = session.regenerate(first_id).await.unwrap();
    assert_ne!(first_id, second_id);

    // The fresh sibling is active; the original remains reachable.
    let path = session.active_path();
    assert_eq!(path.len(), 2);
    assert_eq!(path[1].id, second_id);
    assert_eq!(path[1].content, "better answer");

    let position = session.branch_position(second_id).unwrap();
    assert_eq!(position.count, 2);
    assert_eq!(position.index, 0);
    assert!(position.has_previous);
    assert!(!position.has_next);
}

#[tokio::test]
async fn switch_branch_steps_between_alternates_and_pins_at_the_edge() {
    let store = MemoryMessageStore::new();
    let completion = ScriptedCompletion::new(vec![
        vec![
            CompletionEvent::TextDelta("first".to_string()),
            CompletionEvent::Done,
        ],
        vec![
            CompletionEvent::TextDelta("second".to_string()),
            CompletionEvent::Done,
        ],
    ]);
    let (session, _) = open_session(&store, completion);

    let first_id = session.send_user_message("q").await.unwrap();
    let second_id = session.regenerate(first_id).await.unwrap();

    // Previous steps back to the older alternate, which then becomes the
    // newest selection and re-ranks to the front of the sibling order.
    let target = session
        .switch_branch(second_id, Direction::Previous)
        .await
        .unwrap();
    assert_eq!(target, first_id);
    assert_eq!(session.active_path()[1].content, "first");

    let position = session.branch_position(first_id).unwrap();
    assert_eq!(position.index, 0);
    assert!(position.has_previous);
    assert!(!position.has_next);

    // From the front, Next reaffirms; Previous steps to the other sibling.
    let target = session
        .switch_branch(first_id, Direction::Next)
        .await
        .unwrap();
    assert_eq!(target, first_id);

    let target = session
        .switch_branch(first_id, Direction::Previous)
        .await
        .unwrap();
    assert_eq!(target, second_id);
    assert_eq!(session.active_path()[1].content, "second");
}

#[tokio::test]
async fn edit_and_resend_branches_the_user_turn() {
    let store = MemoryMessageStore::new();
    let completion = ScriptedCompletion::new(vec![
        vec![
            CompletionEvent::TextDelta("answer one".to_string()),
            CompletionEvent::Done,
        ],
        vec![
            CompletionEvent::TextDelta("answer two".to_string()),
            CompletionEvent::Done,
        ],
    ]);
    let (session, _) = open_session(&store, completion);

    session.send_user_message("orignal qestion").await.unwrap();
    let original_user = session.active_path()[0].id;

    session
        .edit_and_resend(original_user, "original question")
        .await
        .unwrap();

    let path = session.active_path();
    assert_eq!(path.len(), 2);
    assert_eq!(path[0].content, "original question");
    assert_eq!(path[1].content, "answer two");

    // Both phrasings coexist as user siblings.
    let position = session.branch_position(path[0].id).unwrap();
    assert_eq!(position.count, 2);
}

#[tokio::test]
async fn truncate_after_deletes_the_subtree_from_the_store() {
    let store = MemoryMessageStore::new();
    let completion = ScriptedCompletion::new(vec![
        vec![
            CompletionEvent::TextDelta("a1".to_string()),
            CompletionEvent::Done,
        ],
        vec![
            CompletionEvent::TextDelta("a2".to_string()),
            CompletionEvent::Done,
        ],
    ]);
    let (session, conversation_id) = open_session(&store, completion);

    let first_assistant = session.send_user_message("one").await.unwrap();
    session.send_user_message("two").await.unwrap();
    assert_eq!(session.active_path().len(), 4);

    let deleted = session.truncate_after(first_assistant).await.unwrap();
    assert_eq!(deleted.len(), 2);

    let path = session.active_path();
    assert_eq!(path.len(), 2);
    assert_eq!(path[1].id, first_assistant);

    let store_for_check = store.clone();
    eventually(move || store_for_check.snapshot(conversation_id).len() == 2).await;
}

#[tokio::test]
async fn failed_create_rolls_back_the_optimistic_insert() {
    let memory = MemoryMessageStore::new();
    let failing = FailingStore::new(memory.clone());
    failing.fail_creates.store(true, Ordering::SeqCst);

    let conversation_id = Uuid::new_v4();
    let session = ChatSession::open(
        conversation_id,
        Arc::clone(&failing) as Arc<dyn MessageStore>,
        ScriptedCompletion::answering("never"),
    );

    let err = session.send_user_message("hello").await.unwrap_err();
    assert!(matches!(err, SessionError::StoreWrite(_)));

    // No partial tree mutation stays visible.
    assert!(session.snapshot().is_empty());
    assert!(session.active_path().is_empty());
    assert!(memory.snapshot(conversation_id).is_empty());
    assert_eq!(session.turn_state(), TurnState::Idle);
}

#[tokio::test]
async fn failed_delete_restores_the_local_view() {
    let memory = MemoryMessageStore::new();
    let failing = FailingStore::new(memory.clone());

    let conversation_id = Uuid::new_v4();
    let session = ChatSession::open(
        conversation_id,
        Arc::clone(&failing) as Arc<dyn MessageStore>,
        ScriptedCompletion::answering("kept"),
    );

    let assistant_id = session.send_user_message("hello").await.unwrap();

    failing.fail_deletes.store(true, Ordering::SeqCst);
    let user_id = session.active_path()[0].id;
    let err = session.truncate_after(user_id).await.unwrap_err();
    assert!(matches!(err, SessionError::StoreWrite(_)));

    // The assistant leaf is still rendered and still in the store.
    assert!(session
        .active_path()
        .iter()
        .any(|m| m.id == assistant_id));
    assert_eq!(memory.snapshot(conversation_id).len(), 2);
}

#[tokio::test]
async fn stream_error_keeps_the_partial_branch_visible() {
    let store = MemoryMessageStore::new();
    let completion = ScriptedCompletion::new(vec![vec![
        CompletionEvent::TextDelta("partial answer".to_string()),
        CompletionEvent::Error("quota exceeded".to_string()),
    ]]);
    let (session, conversation_id) = open_session(&store, completion);

    let err = session.send_user_message("question").await.unwrap_err();
    assert_eq!(err, SessionError::Stream("quota exceeded".to_string()));

    let path = session.active_path();
    assert_eq!(path.len(), 2);
    assert!(path[1].content.contains("partial answer"));
    assert!(path[1].content.contains("quota exceeded"));
    assert_eq!(
        session.turn_state(),
        TurnState::Errored {
            error: "quota exceeded".to_string()
        }
    );

    // Never silently dropped: the errored leaf is durable too.
    let stored = store.snapshot(conversation_id);
    assert!(stored
        .iter()
        .any(|m| m.content.contains("quota exceeded")));
}

#[tokio::test]
async fn cancellation_finalizes_the_partial_message_as_a_leaf() {
    let store = MemoryMessageStore::new();
    let release = Arc::new(Notify::new());
    let completion = Arc::new(BlockedCompletion {
        release: Arc::clone(&release),
    });
    let (session, conversation_id) = open_session(&store, completion);

    let sender = Arc::clone(&session);
    let turn = tokio::spawn(async move { sender.send_user_message("question").await });

    let waiter = Arc::clone(&session);
    eventually(move || waiter.turn_state() == TurnState::Streaming).await;
    session.cancel_streaming();

    let assistant_id = turn.await.unwrap().unwrap();
    assert_eq!(session.turn_state(), TurnState::Finalized);

    let path = session.active_path();
    assert_eq!(path[1].id, assistant_id);
    assert_eq!(path[1].content, "partial");

    // The cancelled turn is a legitimate branch, not rolled back.
    let store_for_check = store.clone();
    eventually(move || {
        store_for_check
            .snapshot(conversation_id)
            .iter()
            .any(|m| m.id == assistant_id && m.content == "partial")
    })
    .await;
}

#[tokio::test]
async fn close_detaches_from_the_change_feed() {
    let store = MemoryMessageStore::new();
    let (session, conversation_id) = open_session(&store, ScriptedCompletion::answering("ok"));

    session.send_user_message("hello").await.unwrap();
    let frozen = session.active_path();

    session.close();
    // Closing twice is fine; the unsubscribe handle fires only once.
    session.close();

    store
        .create_message(conversation_id, Message::user("out of band", None))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(session.active_path(), frozen);
}

#[tokio::test]
async fn delete_conversation_cascades_to_every_message() {
    let store = MemoryMessageStore::new();
    let (session, conversation_id) = open_session(&store, ScriptedCompletion::answering("ok"));

    session.send_user_message("hello").await.unwrap();
    session.delete_conversation().await.unwrap();

    assert!(session.active_path().is_empty());
    let store_for_check = store.clone();
    eventually(move || store_for_check.snapshot(conversation_id).is_empty()).await;
}
