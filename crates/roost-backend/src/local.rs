use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;
use uuid::Uuid;

use roost_types::events::{ConversationEvent, MessageEvent, TypingEvent};
use roost_types::models::{ConversationOverview, Membership, Message, UserSummary};
use roost_types::requests::{NewConversation, NewMembership, NewMessage};

use crate::feed::{FeedEvent, FeedHub};
use crate::store::Store;
use crate::{Backend, StoreError};

/// In-process reference implementation of [`Backend`]: a rusqlite store for
/// the relational capabilities and a [`FeedHub`] for the live ones.
///
/// A `LocalBackend` value is a per-client handle. Clones share the store and
/// the hub; the session identity is per handle, so several signed-in clients
/// can drive one backend side by side (as the tests and the console do).
#[derive(Clone)]
pub struct LocalBackend {
    store: Arc<Store>,
    hub: FeedHub,
    session: Option<UserSummary>,
}

impl LocalBackend {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::with_store(Store::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::with_store(Store::open_in_memory()?))
    }

    fn with_store(store: Store) -> Self {
        Self {
            store: Arc::new(store),
            hub: FeedHub::new(),
            session: None,
        }
    }

    /// Create a user row. Fails with [`StoreError::Conflict`] when the
    /// username is taken.
    pub fn register_user(&self, username: &str) -> Result<UserSummary, StoreError> {
        let user = UserSummary {
            id: Uuid::new_v4(),
            username: username.to_string(),
        };
        self.store.insert_user(user.id, username, Utc::now())?;
        info!("Registered user {} ({})", user.username, user.id);
        Ok(user)
    }

    pub fn find_user(&self, username: &str) -> Result<Option<UserSummary>, StoreError> {
        self.store.user_by_username(username)
    }

    pub fn users(&self) -> Result<Vec<UserSummary>, StoreError> {
        self.store.users()
    }

    /// A handle sharing this backend's store and feeds, authenticated as
    /// the given user.
    pub fn signed_in_as(&self, username: &str) -> Result<LocalBackend, StoreError> {
        let user = self
            .find_user(username)?
            .ok_or(StoreError::NotFound("user"))?;
        Ok(Self {
            store: self.store.clone(),
            hub: self.hub.clone(),
            session: Some(user),
        })
    }

    /// Membership row lookup; used to inspect per-user conversation flags.
    pub fn membership(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<Membership>, StoreError> {
        self.store.membership(conversation_id, user_id)
    }
}

impl Backend for LocalBackend {
    async fn session(&self) -> Result<Option<UserSummary>, StoreError> {
        Ok(self.session.clone())
    }

    async fn user_summary(&self, user_id: Uuid) -> Result<Option<UserSummary>, StoreError> {
        self.store.user_summary(user_id)
    }

    async fn conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        self.store.conversation_messages(conversation_id)
    }

    async fn user_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationOverview>, StoreError> {
        self.store.user_conversations(user_id)
    }

    async fn direct_conversation_between(&self, a: Uuid, b: Uuid) -> Result<Option<Uuid>, StoreError> {
        self.store.direct_conversation_between(a, b)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<(), StoreError> {
        self.store.insert_message(&message)?;
        let conversation_id = message.conversation_id;
        self.hub
            .publish(FeedEvent::Message(MessageEvent::Inserted(message.record())));
        // A new message changes the conversation's preview projection.
        self.hub
            .publish(FeedEvent::Conversation(ConversationEvent::Updated {
                conversation_id,
            }));
        Ok(())
    }

    async fn insert_conversation(&self, conversation: NewConversation) -> Result<(), StoreError> {
        self.store.insert_conversation(&conversation)?;
        self.hub
            .publish(FeedEvent::Conversation(ConversationEvent::Inserted {
                conversation_id: conversation.id,
            }));
        Ok(())
    }

    async fn insert_membership(&self, membership: NewMembership) -> Result<(), StoreError> {
        self.store.insert_membership(&membership)?;
        // Membership rows gate visibility, so a change to them is surfaced
        // as a conversation change.
        self.hub
            .publish(FeedEvent::Conversation(ConversationEvent::Updated {
                conversation_id: membership.conversation_id,
            }));
        Ok(())
    }

    async fn set_muted(&self, conversation_id: Uuid, user_id: Uuid, muted: bool) -> Result<(), StoreError> {
        self.store.set_muted(conversation_id, user_id, muted)?;
        self.hub
            .publish(FeedEvent::Conversation(ConversationEvent::Updated {
                conversation_id,
            }));
        Ok(())
    }

    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid, message_id: Uuid) -> Result<(), StoreError> {
        self.store.mark_read(conversation_id, user_id, message_id)?;
        self.hub
            .publish(FeedEvent::Conversation(ConversationEvent::Updated {
                conversation_id,
            }));
        Ok(())
    }

    async fn watch_messages(&self, conversation_id: Uuid) -> UnboundedReceiver<MessageEvent> {
        self.hub.watch_messages(conversation_id).await
    }

    async fn watch_conversations(&self) -> UnboundedReceiver<ConversationEvent> {
        self.hub.watch_conversations().await
    }

    async fn publish_typing(&self, conversation_id: Uuid, user: UserSummary) {
        self.hub.publish_typing(conversation_id, user).await
    }

    async fn subscribe_typing(&self, conversation_id: Uuid) -> UnboundedReceiver<TypingEvent> {
        self.hub.subscribe_typing(conversation_id).await
    }
}
