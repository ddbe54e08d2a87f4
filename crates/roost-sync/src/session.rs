use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use roost_backend::Backend;
use roost_types::events::{ConversationEvent, MessageEvent, TypingEvent};
use roost_types::models::{ConversationOverview, Message, UserSummary};

use crate::conversation_list::ConversationList;
use crate::error::SyncError;
use crate::message_stream::MessageStream;
use crate::typing::TypingTracker;

/// Typing expiry is enforced on read; the sweep tick only bounds how long
/// an expired entry can linger before a change notification goes out.
const TYPING_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Notifications pushed toward the UI. State is not carried along; the
/// receiver reads the current snapshot through the session's accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConversationsChanged,
    MessagesChanged { conversation_id: Uuid },
    TypingChanged { conversation_id: Uuid },
}

/// One signed-in client session: the conversation list, the currently open
/// conversation's message stream and typing state, and the live
/// subscriptions feeding them.
///
/// Cheap to clone; all clones share one state. Mutations are interleaved
/// through the inner locks, never parallel, so event application keeps the
/// single-threaded semantics the synchronization rules assume.
pub struct ChatSession<B: Backend> {
    inner: Arc<SessionInner<B>>,
}

impl<B: Backend> Clone for ChatSession<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: Backend> std::fmt::Debug for ChatSession<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession").finish_non_exhaustive()
    }
}

struct SessionInner<B: Backend> {
    backend: B,
    user: UserSummary,
    conversations: RwLock<ConversationList<B>>,
    active: RwLock<Option<ActiveConversation<B>>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    shutdown: CancellationToken,
}

struct ActiveConversation<B> {
    stream: MessageStream<B>,
    typing: TypingTracker,
    cancel: CancellationToken,
}

impl<B: Backend + Clone> ChatSession<B> {
    /// Start a session for the backend's current user.
    ///
    /// Fails with [`SyncError::AuthRequired`] when the backend has no
    /// session; callers route to login. The returned receiver carries
    /// change notifications for the session's whole lifetime.
    pub async fn start(backend: B) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), SyncError> {
        let user = backend
            .session()
            .await
            .map_err(SyncError::Fetch)?
            .ok_or(SyncError::AuthRequired)?;
        info!("Starting chat session for {} ({})", user.username, user.id);

        let mut list = ConversationList::new(backend.clone(), user.clone());
        list.refresh().await?;
        let conversation_rx = backend.watch_conversations().await;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            inner: Arc::new(SessionInner {
                backend,
                user,
                conversations: RwLock::new(list),
                active: RwLock::new(None),
                events: events_tx,
                shutdown: CancellationToken::new(),
            }),
        };
        session.spawn_conversation_watcher(conversation_rx);
        Ok((session, events_rx))
    }

    pub fn user(&self) -> &UserSummary {
        &self.inner.user
    }

    /// Stop all watcher tasks. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    // -- Conversation list --

    pub async fn conversations(&self) -> Vec<ConversationOverview> {
        self.inner.conversations.read().await.entries().to_vec()
    }

    pub async fn refresh_conversations(&self) -> Result<(), SyncError> {
        self.inner.conversations.write().await.refresh().await?;
        self.emit(SessionEvent::ConversationsChanged);
        Ok(())
    }

    /// Open (or create) the direct conversation with another user and
    /// navigate to it.
    pub async fn create_direct(&self, other_user: Uuid) -> Result<Uuid, SyncError> {
        let id = {
            let mut list = self.inner.conversations.write().await;
            list.create_direct(other_user).await?
        };
        self.emit(SessionEvent::ConversationsChanged);
        self.open_conversation(id).await?;
        Ok(id)
    }

    /// Create a group conversation and navigate to it.
    pub async fn create_group(&self, name: &str, member_ids: &[Uuid]) -> Result<Uuid, SyncError> {
        let id = {
            let mut list = self.inner.conversations.write().await;
            list.create_group(name, member_ids).await?
        };
        self.emit(SessionEvent::ConversationsChanged);
        self.open_conversation(id).await?;
        Ok(id)
    }

    pub async fn set_muted(&self, conversation_id: Uuid, muted: bool) -> Result<(), SyncError> {
        self.inner
            .conversations
            .write()
            .await
            .set_muted(conversation_id, muted)
            .await?;
        self.emit(SessionEvent::ConversationsChanged);
        Ok(())
    }

    pub async fn mark_read(&self, conversation_id: Uuid, message_id: Uuid) -> Result<(), SyncError> {
        self.inner
            .conversations
            .write()
            .await
            .mark_read(conversation_id, message_id)
            .await?;
        self.emit(SessionEvent::ConversationsChanged);
        Ok(())
    }

    // -- Active conversation --

    /// Switch the active conversation: tear down the previous live
    /// subscription, fetch history, then watch the new conversation's
    /// message feed and typing channel.
    ///
    /// The subscriptions are established before the history fetch so
    /// inserts landing mid-fetch are not missed; any overlap is absorbed by
    /// id. On a failed fetch no conversation is left open.
    pub async fn open_conversation(&self, conversation_id: Uuid) -> Result<(), SyncError> {
        {
            let mut active = self.inner.active.write().await;
            if let Some(prev) = active.take() {
                debug!("leaving conversation {}", prev.stream.conversation_id());
                prev.cancel.cancel();
            }
        }

        let message_rx = self.inner.backend.watch_messages(conversation_id).await;
        let typing_rx = self.inner.backend.subscribe_typing(conversation_id).await;

        let mut stream = MessageStream::new(
            self.inner.backend.clone(),
            self.inner.user.clone(),
            conversation_id,
        );
        stream.load_history().await?;

        let cancel = self.inner.shutdown.child_token();
        {
            let mut active = self.inner.active.write().await;
            *active = Some(ActiveConversation {
                stream,
                typing: TypingTracker::new(self.inner.user.id),
                cancel: cancel.clone(),
            });
        }
        info!("opened conversation {}", conversation_id);
        self.emit(SessionEvent::MessagesChanged { conversation_id });

        self.spawn_message_watcher(conversation_id, cancel, message_rx, typing_rx);
        Ok(())
    }

    pub async fn close_conversation(&self) {
        let mut active = self.inner.active.write().await;
        if let Some(prev) = active.take() {
            debug!("closing conversation {}", prev.stream.conversation_id());
            prev.cancel.cancel();
        }
    }

    pub async fn active_conversation(&self) -> Option<Uuid> {
        self.inner
            .active
            .read()
            .await
            .as_ref()
            .map(|a| a.stream.conversation_id())
    }

    /// Snapshot of the open conversation's message sequence.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner
            .active
            .read()
            .await
            .as_ref()
            .map(|a| a.stream.messages().to_vec())
            .unwrap_or_default()
    }

    /// Remote users currently typing in the open conversation.
    pub async fn typing_users(&self) -> Vec<UserSummary> {
        self.inner
            .active
            .read()
            .await
            .as_ref()
            .map(|a| a.typing.active(Instant::now()))
            .unwrap_or_default()
    }

    pub async fn send_message(&self, content: &str) -> Result<Option<Uuid>, SyncError> {
        self.send_with_reply(content, None).await
    }

    /// Send into the open conversation. Empty/whitespace-only input is a
    /// no-op returning `Ok(None)`.
    ///
    /// The message is applied optimistically and visible before the persist
    /// round-trip; on failure exactly that entry is rolled back and
    /// [`SyncError::Persist`] is returned.
    pub async fn send_with_reply(
        &self,
        content: &str,
        reply_to: Option<Uuid>,
    ) -> Result<Option<Uuid>, SyncError> {
        // Optimistic apply.
        let (request, conversation_id) = {
            let mut active = self.inner.active.write().await;
            let conv = active
                .as_mut()
                .ok_or_else(|| SyncError::Validation("no open conversation".to_string()))?;
            let conversation_id = conv.stream.conversation_id();
            match conv.stream.prepare_send(content, reply_to) {
                Some(request) => (request, conversation_id),
                None => return Ok(None),
            }
        };
        let message_id = request.id;
        self.emit(SessionEvent::MessagesChanged { conversation_id });

        // Persist without holding the lock. The live echo of this write may
        // arrive at any point relative to this await, or never; dedup by id
        // absorbs every ordering.
        let result = self.inner.backend.insert_message(request).await;

        // Confirm or roll back, unless the user has navigated away and the
        // stream is gone with its conversation.
        let mut active = self.inner.active.write().await;
        let conv = active
            .as_mut()
            .filter(|c| c.stream.conversation_id() == conversation_id);
        match result {
            Ok(()) => {
                if let Some(conv) = conv {
                    conv.stream.confirm(message_id);
                    drop(active);
                    self.emit(SessionEvent::MessagesChanged { conversation_id });
                }
                Ok(Some(message_id))
            }
            Err(e) => {
                if let Some(conv) = conv {
                    conv.stream.rollback(message_id);
                    drop(active);
                    self.emit(SessionEvent::MessagesChanged { conversation_id });
                }
                Err(SyncError::Persist(e))
            }
        }
    }

    /// Forward a composer keystroke to the conversation's typing channel.
    /// No debounce: every keystroke re-publishes.
    pub async fn notify_typing(&self) {
        let conversation_id = self
            .inner
            .active
            .read()
            .await
            .as_ref()
            .map(|a| a.stream.conversation_id());
        if let Some(conversation_id) = conversation_id {
            self.inner
                .backend
                .publish_typing(conversation_id, self.inner.user.clone())
                .await;
        }
    }

    // -- Watchers --

    fn spawn_conversation_watcher(&self, mut rx: mpsc::UnboundedReceiver<ConversationEvent>) {
        let inner = self.inner.clone();
        let cancel = self.inner.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        inner.apply_conversation_event(event).await;
                    }
                }
            }
            debug!("conversation watcher stopped");
        });
    }

    fn spawn_message_watcher(
        &self,
        conversation_id: Uuid,
        cancel: CancellationToken,
        mut message_rx: mpsc::UnboundedReceiver<MessageEvent>,
        mut typing_rx: mpsc::UnboundedReceiver<TypingEvent>,
    ) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(TYPING_SWEEP_INTERVAL);
            sweep.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = message_rx.recv() => {
                        let Some(event) = event else { break };
                        inner.apply_message_event(conversation_id, event).await;
                    }
                    event = typing_rx.recv() => {
                        let Some(event) = event else { break };
                        inner.apply_typing_event(conversation_id, event).await;
                    }
                    _ = sweep.tick() => {
                        inner.sweep_typing(conversation_id).await;
                    }
                }
            }
            debug!("message watcher for {} stopped", conversation_id);
        });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }
}

impl<B: Backend> SessionInner<B> {
    /// Staleness guard shared by the event paths: events are applied only
    /// while their conversation is still the active one. Teardown on switch
    /// already stops the feed; this check also covers events drained before
    /// the cancellation landed.
    fn is_current<'a>(
        active: &'a mut Option<ActiveConversation<B>>,
        conversation_id: Uuid,
    ) -> Option<&'a mut ActiveConversation<B>> {
        active
            .as_mut()
            .filter(|a| a.stream.conversation_id() == conversation_id)
    }

    async fn apply_conversation_event(&self, event: ConversationEvent) {
        let mut list = self.conversations.write().await;
        match list.handle_change(event).await {
            Ok(()) => {
                let _ = self.events.send(SessionEvent::ConversationsChanged);
            }
            Err(e) => warn!("conversation list refresh failed: {}", e),
        }
    }

    async fn apply_message_event(&self, conversation_id: Uuid, event: MessageEvent) {
        let mut active = self.active.write().await;
        let Some(conv) = Self::is_current(&mut active, conversation_id) else {
            debug!("dropping stale event for conversation {}", conversation_id);
            return;
        };
        if conv.stream.handle_event(event).await {
            let _ = self
                .events
                .send(SessionEvent::MessagesChanged { conversation_id });
        }
    }

    async fn apply_typing_event(&self, conversation_id: Uuid, event: TypingEvent) {
        let mut active = self.active.write().await;
        let Some(conv) = Self::is_current(&mut active, conversation_id) else {
            debug!("dropping stale typing event for conversation {}", conversation_id);
            return;
        };
        if conv.typing.observe(event.user, Instant::now()) {
            let _ = self
                .events
                .send(SessionEvent::TypingChanged { conversation_id });
        }
    }

    async fn sweep_typing(&self, conversation_id: Uuid) {
        let mut active = self.active.write().await;
        let Some(conv) = Self::is_current(&mut active, conversation_id) else {
            return;
        };
        if conv.typing.sweep(Instant::now()) {
            let _ = self
                .events
                .send(SessionEvent::TypingChanged { conversation_id });
        }
    }
}
