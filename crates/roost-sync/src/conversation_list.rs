use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use roost_backend::{Backend, StoreError};
use roost_types::events::ConversationEvent;
use roost_types::models::{ConversationOverview, UserSummary};
use roost_types::requests::{NewConversation, NewMembership};

use crate::error::SyncError;

/// Conversation List Sync: the set of conversations the current user
/// belongs to, each annotated with its latest-message preview.
///
/// The cache follows a full-reconciliation strategy: any conversation
/// change anywhere invalidates the list and the scoped query is re-run
/// wholesale. The list view is a cross-table projection (membership join
/// plus latest message), cheaper to recompute than to patch correctly for
/// every change shape.
pub struct ConversationList<B> {
    backend: B,
    user: UserSummary,
    entries: Vec<ConversationOverview>,
}

impl<B: Backend> ConversationList<B> {
    pub fn new(backend: B, user: UserSummary) -> Self {
        Self {
            backend,
            user,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[ConversationOverview] {
        &self.entries
    }

    /// Re-run the membership-scoped query and replace the cached list.
    /// On failure the previous cache is kept.
    pub async fn refresh(&mut self) -> Result<(), SyncError> {
        self.entries = self
            .backend
            .user_conversations(self.user.id)
            .await
            .map_err(SyncError::Fetch)?;
        Ok(())
    }

    /// Any conversation-table change triggers a refresh; the delta is never
    /// applied locally. Changes to conversations the user is not a member
    /// of fall out naturally, since the scoped query excludes them.
    pub async fn handle_change(&mut self, event: ConversationEvent) -> Result<(), SyncError> {
        debug!(
            "conversation {} changed, refreshing list",
            event.conversation_id()
        );
        self.refresh().await
    }

    /// Open (or create) the direct conversation with another user.
    ///
    /// At most one direct conversation exists per pair; when a row already
    /// exists it is returned as-is, and losing an insert race to the peer
    /// lands on the surviving row.
    pub async fn create_direct(&mut self, other_user: Uuid) -> Result<Uuid, SyncError> {
        if other_user == self.user.id {
            return Err(SyncError::Validation(
                "cannot start a direct conversation with yourself".to_string(),
            ));
        }

        if let Some(existing) = self
            .backend
            .direct_conversation_between(self.user.id, other_user)
            .await
            .map_err(SyncError::Fetch)?
        {
            return Ok(existing);
        }

        let conversation_id = Uuid::new_v4();
        let insert = self
            .backend
            .insert_conversation(NewConversation {
                id: conversation_id,
                name: None,
                is_group: false,
                direct_pair: Some((self.user.id, other_user)),
                created_at: Utc::now(),
            })
            .await;
        match insert {
            Ok(()) => {}
            Err(StoreError::Conflict(detail)) => {
                return self
                    .backend
                    .direct_conversation_between(self.user.id, other_user)
                    .await
                    .map_err(SyncError::Fetch)?
                    .ok_or(SyncError::Persist(StoreError::Conflict(detail)));
            }
            Err(e) => return Err(SyncError::Persist(e)),
        }

        self.add_members(conversation_id, &[(self.user.id, false), (other_user, false)])
            .await?;
        self.refresh().await?;
        Ok(conversation_id)
    }

    /// Create a group conversation. The initiating user becomes admin.
    pub async fn create_group(&mut self, name: &str, member_ids: &[Uuid]) -> Result<Uuid, SyncError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::Validation(
                "group name must not be empty".to_string(),
            ));
        }
        let mut members: Vec<Uuid> = member_ids
            .iter()
            .copied()
            .filter(|id| *id != self.user.id)
            .collect();
        members.sort_unstable();
        members.dedup();
        if members.is_empty() {
            return Err(SyncError::Validation(
                "a group needs at least one other member".to_string(),
            ));
        }

        let conversation_id = Uuid::new_v4();
        self.backend
            .insert_conversation(NewConversation {
                id: conversation_id,
                name: Some(name.to_string()),
                is_group: true,
                direct_pair: None,
                created_at: Utc::now(),
            })
            .await
            .map_err(SyncError::Persist)?;

        let mut rows = vec![(self.user.id, true)];
        rows.extend(members.into_iter().map(|id| (id, false)));
        self.add_members(conversation_id, &rows).await?;
        self.refresh().await?;
        Ok(conversation_id)
    }

    pub async fn set_muted(&mut self, conversation_id: Uuid, muted: bool) -> Result<(), SyncError> {
        self.backend
            .set_muted(conversation_id, self.user.id, muted)
            .await
            .map_err(SyncError::Persist)?;
        self.refresh().await
    }

    /// Move the membership's read pointer to the given message.
    pub async fn mark_read(&mut self, conversation_id: Uuid, message_id: Uuid) -> Result<(), SyncError> {
        self.backend
            .mark_read(conversation_id, self.user.id, message_id)
            .await
            .map_err(SyncError::Persist)?;
        self.refresh().await
    }

    async fn add_members(&self, conversation_id: Uuid, members: &[(Uuid, bool)]) -> Result<(), SyncError> {
        for (user_id, is_admin) in members {
            let result = self
                .backend
                .insert_membership(NewMembership {
                    id: Uuid::new_v4(),
                    conversation_id,
                    user_id: *user_id,
                    is_admin: *is_admin,
                    joined_at: Utc::now(),
                })
                .await;
            if let Err(e) = result {
                // No compensating rollback: without its membership rows the
                // conversation stays invisible to every user.
                warn!(
                    "membership insert for {} in {} failed: {}; conversation left orphaned",
                    user_id, conversation_id, e
                );
                return Err(SyncError::Persist(e));
            }
        }
        Ok(())
    }
}
