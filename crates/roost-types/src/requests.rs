use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageRecord;

/// Insert request for a message row. The id is client-generated before the
/// network round-trip so the optimistic local copy and the persisted row
/// share one identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub reply_to: Option<Uuid>,
}

impl NewMessage {
    /// The row shape this insert will produce on the change feed.
    pub fn record(&self) -> MessageRecord {
        MessageRecord {
            id: self.id,
            conversation_id: self.conversation_id,
            author_id: self.author_id,
            content: self.content.clone(),
            created_at: self.created_at,
            edited: false,
            reply_to: self.reply_to,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConversation {
    pub id: Uuid,
    pub name: Option<String>,
    pub is_group: bool,
    /// For direct conversations, the two participants. The backend enforces
    /// at most one direct conversation per pair.
    pub direct_pair: Option<(Uuid, Uuid)>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMembership {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
}
