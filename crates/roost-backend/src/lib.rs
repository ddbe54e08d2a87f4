//! The managed-platform client boundary.
//!
//! The synchronization layer consumes the backing platform through the
//! [`Backend`] trait: session lookup, structured queries, enforced inserts,
//! change-feed subscriptions, and an ephemeral broadcast channel. Any
//! substitute platform implements the same trait; [`LocalBackend`] is the
//! in-process reference implementation used by the tests and the console.

pub mod feed;
pub mod local;
pub mod migrations;
pub mod store;

use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use roost_types::events::{ConversationEvent, MessageEvent, TypingEvent};
use roost_types::models::{ConversationOverview, Message, UserSummary};
use roost_types::requests::{NewConversation, NewMembership, NewMessage};

pub use local::LocalBackend;

/// Errors surfaced by the platform boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness rule rejected the write (duplicate id, username,
    /// direct-conversation pair).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A foreign-key or check constraint rejected the write.
    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Transport or storage failure.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// The capability surface the synchronization layer requires of the backing
/// platform.
///
/// Subscriptions hand back plain receivers; dropping the receiver tears the
/// subscription down. Change-feed delivery is at-least-once and ordered
/// within one scope, with no ordering guarantee across scopes.
pub trait Backend: Send + Sync + 'static {
    /// Current authenticated user, or `None` when there is no session.
    fn session(&self) -> impl Future<Output = Result<Option<UserSummary>, StoreError>> + Send;

    fn user_summary(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Option<UserSummary>, StoreError>> + Send;

    /// All messages of one conversation, author-joined, ascending by
    /// creation time.
    fn conversation_messages(
        &self,
        conversation_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// All conversations the user holds a membership row for, newest first,
    /// each annotated with its latest-message preview and unread count.
    fn user_conversations(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Vec<ConversationOverview>, StoreError>> + Send;

    /// The direct conversation between two users, if one exists.
    fn direct_conversation_between(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> impl Future<Output = Result<Option<Uuid>, StoreError>> + Send;

    fn insert_message(
        &self,
        message: NewMessage,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn insert_conversation(
        &self,
        conversation: NewConversation,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn insert_membership(
        &self,
        membership: NewMembership,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn set_muted(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        muted: bool,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        message_id: Uuid,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Subscribe to message-table changes for one conversation.
    fn watch_messages(
        &self,
        conversation_id: Uuid,
    ) -> impl Future<Output = UnboundedReceiver<MessageEvent>> + Send;

    /// Subscribe to conversation-table changes, system-wide and unfiltered.
    fn watch_conversations(
        &self,
    ) -> impl Future<Output = UnboundedReceiver<ConversationEvent>> + Send;

    /// Fire-and-forget typing signal on the conversation's broadcast
    /// channel. No persistence, no delivery guarantee.
    fn publish_typing(
        &self,
        conversation_id: Uuid,
        user: UserSummary,
    ) -> impl Future<Output = ()> + Send;

    fn subscribe_typing(
        &self,
        conversation_id: Uuid,
    ) -> impl Future<Output = UnboundedReceiver<TypingEvent>> + Send;
}
