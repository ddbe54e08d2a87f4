use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Denormalized author projection attached to messages and typing signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// `None` for direct conversations; the display title is derived from
    /// the peer's username instead.
    pub name: Option<String>,
    pub is_group: bool,
    pub created_at: DateTime<Utc>,
}

/// Join row recording that a user participates in a conversation.
/// Unique per (user, conversation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub is_admin: bool,
    pub is_muted: bool,
    pub last_read_message_id: Option<Uuid>,
    pub joined_at: DateTime<Utc>,
}

/// Client-side acknowledgment state of a message. Confirmation is a state
/// transition keyed by the stable client-generated id, not a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Applied locally, persistence not yet acknowledged.
    Pending,
    #[default]
    Confirmed,
}

/// A message as held in the local sequence: raw columns plus the resolved
/// author summary and the client-side delivery state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub author: UserSummary,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
    pub reply_to: Option<Uuid>,
    #[serde(skip)]
    pub delivery: Delivery,
}

/// Raw message row as carried by change-feed payloads. Insert events deliver
/// column values only; the author summary is resolved by a secondary lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
    pub reply_to: Option<Uuid>,
}

impl MessageRecord {
    pub fn into_message(self, author: UserSummary) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            author,
            content: self.content,
            created_at: self.created_at,
            edited: self.edited,
            reply_to: self.reply_to,
            delivery: Delivery::Confirmed,
        }
    }
}

/// Most recent message projection shown on a conversation list row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author_id: Uuid,
}

/// One entry of the conversation list: the conversation, its resolved
/// display title, and the per-user annotations from the membership row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationOverview {
    pub conversation: Conversation,
    pub title: String,
    pub last_message: Option<MessagePreview>,
    pub unread_count: u32,
    pub is_muted: bool,
}

impl ConversationOverview {
    pub fn id(&self) -> Uuid {
        self.conversation.id
    }
}
