use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageRecord, UserSummary};

/// Change-feed events for the message table, scoped per conversation.
/// Delivered at least once, in persistence order within one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MessageEvent {
    Inserted(MessageRecord),
    Updated(MessageRecord),
    Deleted { conversation_id: Uuid, id: Uuid },
}

impl MessageEvent {
    /// The conversation this event is scoped to.
    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::Inserted(record) | Self::Updated(record) => record.conversation_id,
            Self::Deleted { conversation_id, .. } => *conversation_id,
        }
    }

    pub fn message_id(&self) -> Uuid {
        match self {
            Self::Inserted(record) | Self::Updated(record) => record.id,
            Self::Deleted { id, .. } => *id,
        }
    }
}

/// Change-feed events for the conversation table. The subscription is
/// system-wide and unfiltered; consumers react by re-running their scoped
/// query rather than patching the delta locally, so the variants carry
/// nothing but the row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ConversationEvent {
    Inserted { conversation_id: Uuid },
    Updated { conversation_id: Uuid },
    Deleted { conversation_id: Uuid },
}

impl ConversationEvent {
    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::Inserted { conversation_id }
            | Self::Updated { conversation_id }
            | Self::Deleted { conversation_id } => *conversation_id,
        }
    }
}

/// Ephemeral broadcast signal: a user is typing in a conversation.
/// Fire-and-forget, never persisted, no delivery guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingEvent {
    pub conversation_id: Uuid,
    pub user: UserSummary,
}
