use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use roost_backend::Backend;
use roost_types::events::MessageEvent;
use roost_types::models::{Delivery, Message, MessageRecord, UserSummary};
use roost_types::requests::NewMessage;

use crate::error::SyncError;

/// Ordered, deduplicated message sequence for one conversation.
///
/// Append-mostly: live inserts land at the end in feed order, edits and
/// deletes mutate in place, and an optimistic entry is confirmed or removed
/// by its client-generated id. The id is the only dedup key: the same
/// message arriving once as an optimistic write and once as a live echo
/// collapses to a single record.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Replace the whole sequence with a freshly fetched history.
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Append unless the id is already present. Returns whether it appended.
    pub fn apply_insert(&mut self, message: Message) -> bool {
        if self.contains(message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// In-place edit: content is replaced and the edited flag set. The
    /// entry is confirmed as a side effect, since an edit only exists for
    /// a persisted row.
    pub fn apply_update(&mut self, record: &MessageRecord) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == record.id) else {
            return false;
        };
        message.content = record.content.clone();
        message.edited = record.edited;
        message.delivery = Delivery::Confirmed;
        true
    }

    pub fn apply_delete(&mut self, id: Uuid) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.messages.len() != before
    }

    /// `Pending -> Confirmed` transition for an acknowledged optimistic
    /// write.
    pub fn confirm(&mut self, id: Uuid) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        message.delivery = Delivery::Confirmed;
        true
    }

    /// Exact rollback: the identified entry is removed, every other entry
    /// keeps its identity and position.
    pub fn remove(&mut self, id: Uuid) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(index))
    }
}

/// Message Stream Sync for the active conversation: historical fetch, live
/// event application, and the optimistic send protocol over a [`Backend`].
pub struct MessageStream<B> {
    backend: B,
    user: UserSummary,
    conversation_id: Uuid,
    log: MessageLog,
}

impl<B: Backend> MessageStream<B> {
    pub fn new(backend: B, user: UserSummary, conversation_id: Uuid) -> Self {
        Self {
            backend,
            user,
            conversation_id,
            log: MessageLog::new(),
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    /// Fetch the full history and replace the local sequence. On failure
    /// the sequence is emptied: an error state, never a partial one.
    pub async fn load_history(&mut self) -> Result<(), SyncError> {
        match self.backend.conversation_messages(self.conversation_id).await {
            Ok(history) => {
                debug!(
                    "loaded {} messages for conversation {}",
                    history.len(),
                    self.conversation_id
                );
                self.log.replace(history);
                Ok(())
            }
            Err(e) => {
                self.log.clear();
                Err(SyncError::Fetch(e))
            }
        }
    }

    /// Apply one live change-feed event. Returns whether the sequence
    /// changed.
    ///
    /// Insert payloads carry raw columns only, so the author summary is
    /// resolved with a secondary lookup before appending. An id that is
    /// already present (the echo of our own optimistic write, or a
    /// redelivery) is dropped.
    pub async fn handle_event(&mut self, event: MessageEvent) -> bool {
        if event.conversation_id() != self.conversation_id {
            debug!(
                "ignoring event for conversation {} while {} is active",
                event.conversation_id(),
                self.conversation_id
            );
            return false;
        }
        match event {
            MessageEvent::Inserted(record) => {
                if self.log.contains(record.id) {
                    debug!("duplicate insert for message {}, ignoring", record.id);
                    return false;
                }
                let author = self.resolve_author(record.author_id).await;
                self.log.apply_insert(record.into_message(author))
            }
            MessageEvent::Updated(record) => self.log.apply_update(&record),
            MessageEvent::Deleted { id, .. } => self.log.apply_delete(id),
        }
    }

    /// Validate and optimistically apply a send. Returns the insert request
    /// to persist, or `None` for empty/whitespace-only input (a no-op, not
    /// an error).
    ///
    /// The entry is visible, marked `Pending`, before any network call;
    /// [`confirm`](Self::confirm) or [`rollback`](Self::rollback) completes
    /// the protocol once the persist outcome is known.
    pub fn prepare_send(&mut self, content: &str, reply_to: Option<Uuid>) -> Option<NewMessage> {
        if content.trim().is_empty() {
            return None;
        }
        let request = NewMessage {
            id: Uuid::new_v4(),
            conversation_id: self.conversation_id,
            author_id: self.user.id,
            content: content.to_string(),
            created_at: Utc::now(),
            reply_to,
        };
        let mut message = request.record().into_message(self.user.clone());
        message.delivery = Delivery::Pending;
        self.log.apply_insert(message);
        Some(request)
    }

    pub fn confirm(&mut self, id: Uuid) {
        self.log.confirm(id);
    }

    /// Remove the optimistic entry after a failed persist.
    pub fn rollback(&mut self, id: Uuid) {
        if self.log.remove(id).is_none() {
            warn!("rollback for unknown message {}", id);
        }
    }

    async fn resolve_author(&self, author_id: Uuid) -> UserSummary {
        match self.backend.user_summary(author_id).await {
            Ok(Some(user)) => user,
            Ok(None) => UserSummary {
                id: author_id,
                username: "unknown".to_string(),
            },
            Err(e) => {
                warn!("author lookup for {} failed: {}", author_id, e);
                UserSummary {
                    id: author_id,
                    username: "unknown".to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn user(name: &str) -> UserSummary {
        UserSummary {
            id: Uuid::new_v4(),
            username: name.to_string(),
        }
    }

    fn message(author: &UserSummary, content: &str, offset_secs: i64) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::nil(),
            author: author.clone(),
            content: content.to_string(),
            created_at: Utc::now() + TimeDelta::seconds(offset_secs),
            edited: false,
            reply_to: None,
            delivery: Delivery::Confirmed,
        }
    }

    #[test]
    fn insert_is_idempotent_by_id() {
        let alice = user("alice");
        let mut log = MessageLog::new();
        let m = message(&alice, "hi", 0);

        assert!(log.apply_insert(m.clone()));
        assert!(!log.apply_insert(m.clone()));
        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].id, m.id);
    }

    #[test]
    fn feed_order_keeps_timestamps_nondecreasing() {
        let alice = user("alice");
        let mut log = MessageLog::new();
        for offset in [0, 1, 1, 3, 7] {
            log.apply_insert(message(&alice, "tick", offset));
        }
        let stamps: Vec<_> = log.messages().iter().map(|m| m.created_at).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn rollback_is_exact() {
        let alice = user("alice");
        let mut log = MessageLog::new();
        for i in 0..3 {
            log.apply_insert(message(&alice, "kept", i));
        }
        let snapshot = log.messages().to_vec();

        let mut pending = message(&alice, "doomed", 4);
        pending.delivery = Delivery::Pending;
        let pending_id = pending.id;
        log.apply_insert(pending);

        let removed = log.remove(pending_id).unwrap();
        assert_eq!(removed.id, pending_id);
        assert_eq!(log.messages(), snapshot.as_slice());
    }

    #[test]
    fn confirm_transitions_pending_in_place() {
        let alice = user("alice");
        let mut log = MessageLog::new();
        let mut m = message(&alice, "hi", 0);
        m.delivery = Delivery::Pending;
        let id = m.id;
        log.apply_insert(m);

        assert!(log.confirm(id));
        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].delivery, Delivery::Confirmed);
    }

    #[test]
    fn update_edits_in_place_and_delete_removes() {
        let alice = user("alice");
        let mut log = MessageLog::new();
        let m = message(&alice, "first draft", 0);
        let id = m.id;
        log.apply_insert(m);
        log.apply_insert(message(&alice, "other", 1));

        let edited = MessageRecord {
            id,
            conversation_id: Uuid::nil(),
            author_id: alice.id,
            content: "second draft".to_string(),
            created_at: Utc::now(),
            edited: true,
            reply_to: None,
        };
        assert!(log.apply_update(&edited));
        assert_eq!(log.messages()[0].content, "second draft");
        assert!(log.messages()[0].edited);

        assert!(log.apply_delete(id));
        assert!(!log.apply_delete(id));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn blank_input_is_a_no_op() {
        let backend = roost_backend::LocalBackend::in_memory().unwrap();
        let alice = user("alice");
        let mut stream = MessageStream::new(backend, alice, Uuid::new_v4());

        assert!(stream.prepare_send("", None).is_none());
        assert!(stream.prepare_send("   \n\t", None).is_none());
        assert!(stream.messages().is_empty());
    }

    #[test]
    fn prepare_send_appends_pending_entry() {
        let backend = roost_backend::LocalBackend::in_memory().unwrap();
        let alice = user("alice");
        let conversation_id = Uuid::new_v4();
        let mut stream = MessageStream::new(backend, alice.clone(), conversation_id);

        let request = stream.prepare_send("hello there", None).unwrap();
        assert_eq!(request.conversation_id, conversation_id);
        assert_eq!(request.author_id, alice.id);

        let appended = &stream.messages()[0];
        assert_eq!(appended.id, request.id);
        assert_eq!(appended.delivery, Delivery::Pending);
        assert_eq!(appended.content, "hello there");
    }
}
