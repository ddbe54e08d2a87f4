//! End-to-end tests: two signed-in sessions over one in-process backend,
//! exercising history fetch, live echo dedup, rollback, list scoping,
//! typing expiry, and conversation-switch staleness.

use std::time::Duration;

use tokio::time::sleep;
use uuid::Uuid;

use roost_backend::{Backend, LocalBackend, StoreError};
use roost_sync::{ChatSession, SyncError};
use roost_types::events::{ConversationEvent, MessageEvent, TypingEvent};
use roost_types::models::{ConversationOverview, Delivery, Message, UserSummary};
use roost_types::requests::{NewConversation, NewMembership, NewMessage};

fn backend_with_users(names: &[&str]) -> (LocalBackend, Vec<UserSummary>) {
    let backend = LocalBackend::in_memory().unwrap();
    let users = names
        .iter()
        .map(|name| backend.register_user(name).unwrap())
        .collect();
    (backend, users)
}

/// Let every queued event drain. Time is paused, so this yields to all
/// runnable tasks and advances the clock only once they are idle.
async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn session_requires_authentication() {
    let (backend, _) = backend_with_users(&["alice"]);

    let err = ChatSession::start(backend).await.unwrap_err();
    assert!(matches!(err, SyncError::AuthRequired));
}

#[tokio::test(start_paused = true)]
async fn own_echo_collapses_to_one_confirmed_message() {
    let (backend, users) = backend_with_users(&["alice", "bob"]);
    let bob_id = users[1].id;

    let (alice, _alice_events) =
        ChatSession::start(backend.signed_in_as("alice").unwrap()).await.unwrap();
    let (bob, _bob_events) =
        ChatSession::start(backend.signed_in_as("bob").unwrap()).await.unwrap();

    let conversation = alice.create_direct(bob_id).await.unwrap();
    bob.open_conversation(conversation).await.unwrap();

    let sent = alice.send_message("hi").await.unwrap().unwrap();
    settle().await;

    // The optimistic write and its live echo collapse by id.
    let messages = alice.messages().await;
    let copies: Vec<&Message> = messages.iter().filter(|m| m.id == sent).collect();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].content, "hi");
    assert_eq!(copies[0].delivery, Delivery::Confirmed);

    // The peer sees it once too, author-resolved.
    let messages = bob.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, sent);
    assert_eq!(messages[0].author.username, "alice");

    alice.shutdown();
    bob.shutdown();
}

#[tokio::test(start_paused = true)]
async fn failed_persist_rolls_back_exactly() {
    let (backend, users) = backend_with_users(&["alice", "bob"]);
    let bob_id = users[1].id;

    let good = backend.signed_in_as("alice").unwrap();
    let (alice, _events) = ChatSession::start(good.clone()).await.unwrap();
    let conversation = alice.create_direct(bob_id).await.unwrap();
    alice.send_message("kept").await.unwrap();
    settle().await;
    alice.shutdown();

    // Same user, same conversation, but writes fail at the platform.
    let (flaky, _events) = ChatSession::start(FailingWrites { inner: good })
        .await
        .unwrap();
    flaky.open_conversation(conversation).await.unwrap();
    let before = flaky.messages().await;
    assert_eq!(before.len(), 1);

    let err = flaky.send_message("doomed").await.unwrap_err();
    assert!(matches!(err, SyncError::Persist(_)));

    // The sequence is exactly the pre-send one: nothing else removed or
    // reordered.
    assert_eq!(flaky.messages().await, before);
    flaky.shutdown();
}

#[tokio::test(start_paused = true)]
async fn list_tracks_memberships_and_ignores_unrelated_conversations() {
    let (backend, users) = backend_with_users(&["alice", "bob", "carol", "dave"]);
    let bob_id = users[1].id;
    let dave_id = users[3].id;

    let (alice, _events) =
        ChatSession::start(backend.signed_in_as("alice").unwrap()).await.unwrap();
    let ab = alice.create_direct(bob_id).await.unwrap();
    settle().await;

    let before: Vec<Uuid> = overview_ids(&alice.conversations().await);
    assert_eq!(before, vec![ab]);

    // Activity in a conversation alice is no member of re-triggers her
    // refresh, which must reproduce the same scoped list.
    let (carol, _events) =
        ChatSession::start(backend.signed_in_as("carol").unwrap()).await.unwrap();
    carol.create_direct(dave_id).await.unwrap();
    carol.send_message("private").await.unwrap();
    settle().await;

    assert_eq!(overview_ids(&alice.conversations().await), before);
    alice.shutdown();
    carol.shutdown();
}

#[tokio::test(start_paused = true)]
async fn typing_signal_appears_and_expires() {
    let (backend, users) = backend_with_users(&["alice", "bob"]);
    let bob_id = users[1].id;

    let (alice, _alice_events) =
        ChatSession::start(backend.signed_in_as("alice").unwrap()).await.unwrap();
    let (bob, _bob_events) =
        ChatSession::start(backend.signed_in_as("bob").unwrap()).await.unwrap();

    let conversation = alice.create_direct(bob_id).await.unwrap();
    bob.open_conversation(conversation).await.unwrap();

    bob.notify_typing().await;
    settle().await;

    let typing = alice.typing_users().await;
    assert_eq!(typing.len(), 1);
    assert_eq!(typing[0].username, "bob");

    // Just short of the window the signal is still visible...
    sleep(Duration::from_millis(1800)).await;
    assert_eq!(alice.typing_users().await.len(), 1);

    // ...and just past it, gone.
    sleep(Duration::from_millis(300)).await;
    assert!(alice.typing_users().await.is_empty());

    // The publisher never sees themselves typing.
    assert!(bob.typing_users().await.is_empty());

    alice.shutdown();
    bob.shutdown();
}

#[tokio::test(start_paused = true)]
async fn switching_conversations_drops_stale_events() {
    let (backend, users) = backend_with_users(&["alice", "bob"]);
    let bob_id = users[1].id;

    let (alice, _alice_events) =
        ChatSession::start(backend.signed_in_as("alice").unwrap()).await.unwrap();
    let (bob, _bob_events) =
        ChatSession::start(backend.signed_in_as("bob").unwrap()).await.unwrap();

    let direct = alice.create_direct(bob_id).await.unwrap();
    let group = alice.create_group("lounge", &[bob_id]).await.unwrap();
    assert_eq!(alice.active_conversation().await, Some(group));

    // Traffic in the conversation alice navigated away from.
    bob.open_conversation(direct).await.unwrap();
    bob.send_message("late").await.unwrap();
    settle().await;

    // The open stream holds only the group's history; nothing leaked
    // across from the direct conversation.
    assert!(alice.messages().await.is_empty());

    // The stale conversation still counts unread in the list.
    let list = alice.conversations().await;
    let direct_row = list.iter().find(|c| c.id() == direct).unwrap();
    assert_eq!(direct_row.unread_count, 1);

    alice.shutdown();
    bob.shutdown();
}

#[tokio::test(start_paused = true)]
async fn mark_read_clears_unread_count() {
    let (backend, users) = backend_with_users(&["alice", "bob"]);
    let bob_id = users[1].id;

    let (alice, _alice_events) =
        ChatSession::start(backend.signed_in_as("alice").unwrap()).await.unwrap();
    let (bob, _bob_events) =
        ChatSession::start(backend.signed_in_as("bob").unwrap()).await.unwrap();

    let conversation = alice.create_direct(bob_id).await.unwrap();
    bob.open_conversation(conversation).await.unwrap();
    let sent = bob.send_message("unread me").await.unwrap().unwrap();
    settle().await;

    let list = alice.conversations().await;
    assert_eq!(list[0].unread_count, 1);

    alice.mark_read(conversation, sent).await.unwrap();
    let list = alice.conversations().await;
    assert_eq!(list[0].unread_count, 0);

    alice.shutdown();
    bob.shutdown();
}

fn overview_ids(list: &[ConversationOverview]) -> Vec<Uuid> {
    list.iter().map(|c| c.id()).collect()
}

/// Backend double whose message writes always fail; everything else
/// delegates to the real local backend.
#[derive(Clone)]
struct FailingWrites {
    inner: LocalBackend,
}

impl Backend for FailingWrites {
    async fn session(&self) -> Result<Option<UserSummary>, StoreError> {
        self.inner.session().await
    }

    async fn user_summary(&self, user_id: Uuid) -> Result<Option<UserSummary>, StoreError> {
        self.inner.user_summary(user_id).await
    }

    async fn conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        self.inner.conversation_messages(conversation_id).await
    }

    async fn user_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationOverview>, StoreError> {
        self.inner.user_conversations(user_id).await
    }

    async fn direct_conversation_between(&self, a: Uuid, b: Uuid) -> Result<Option<Uuid>, StoreError> {
        self.inner.direct_conversation_between(a, b).await
    }

    async fn insert_message(&self, _message: NewMessage) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("injected write failure".to_string()))
    }

    async fn insert_conversation(&self, conversation: NewConversation) -> Result<(), StoreError> {
        self.inner.insert_conversation(conversation).await
    }

    async fn insert_membership(&self, membership: NewMembership) -> Result<(), StoreError> {
        self.inner.insert_membership(membership).await
    }

    async fn set_muted(&self, conversation_id: Uuid, user_id: Uuid, muted: bool) -> Result<(), StoreError> {
        self.inner.set_muted(conversation_id, user_id, muted).await
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), StoreError> {
        self.inner.mark_read(conversation_id, user_id, message_id).await
    }

    async fn watch_messages(
        &self,
        conversation_id: Uuid,
    ) -> tokio::sync::mpsc::UnboundedReceiver<MessageEvent> {
        self.inner.watch_messages(conversation_id).await
    }

    async fn watch_conversations(&self) -> tokio::sync::mpsc::UnboundedReceiver<ConversationEvent> {
        self.inner.watch_conversations().await
    }

    async fn publish_typing(&self, conversation_id: Uuid, user: UserSummary) {
        self.inner.publish_typing(conversation_id, user).await
    }

    async fn subscribe_typing(
        &self,
        conversation_id: Uuid,
    ) -> tokio::sync::mpsc::UnboundedReceiver<TypingEvent> {
        self.inner.subscribe_typing(conversation_id).await
    }
}
