use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::warn;
use uuid::Uuid;

use roost_types::events::{ConversationEvent, MessageEvent, TypingEvent};
use roost_types::models::UserSummary;

/// Row-level change published on the shared feed. Every subscriber's
/// forwarder applies its own scope filter, mirroring how a managed
/// platform's change feed fans out filtered subscriptions.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Message(MessageEvent),
    Conversation(ConversationEvent),
}

/// In-process change-feed and broadcast hub for the reference backend.
///
/// One broadcast channel carries all row events; `watch_*` spawns a
/// forwarder that filters to the requested scope and pushes into an
/// unbounded per-subscriber channel. Typing signals use separate
/// per-conversation broadcast channels and are never persisted.
#[derive(Clone)]
pub struct FeedHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    feed_tx: broadcast::Sender<FeedEvent>,
    typing: RwLock<HashMap<Uuid, broadcast::Sender<TypingEvent>>>,
}

impl FeedHub {
    pub fn new() -> Self {
        let (feed_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(HubInner {
                feed_tx,
                typing: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Publish a row event to every current subscriber.
    pub fn publish(&self, event: FeedEvent) {
        let _ = self.inner.feed_tx.send(event);
    }

    /// Message-table changes scoped to one conversation. Dropping the
    /// receiver tears the subscription down.
    pub async fn watch_messages(&self, conversation_id: Uuid) -> mpsc::UnboundedReceiver<MessageEvent> {
        let mut feed_rx = self.inner.feed_tx.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match feed_rx.recv().await {
                    Ok(FeedEvent::Message(event)) if event.conversation_id() == conversation_id => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Message watch for {} lagged by {} events", conversation_id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        rx
    }

    /// Conversation-table changes, unfiltered.
    pub async fn watch_conversations(&self) -> mpsc::UnboundedReceiver<ConversationEvent> {
        let mut feed_rx = self.inner.feed_tx.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match feed_rx.recv().await {
                    Ok(FeedEvent::Conversation(event)) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Conversation watch lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        rx
    }

    /// Fire-and-forget: dropped when the conversation has no subscribers.
    pub async fn publish_typing(&self, conversation_id: Uuid, user: UserSummary) {
        let typing = self.inner.typing.read().await;
        if let Some(tx) = typing.get(&conversation_id) {
            let _ = tx.send(TypingEvent {
                conversation_id,
                user,
            });
        }
    }

    pub async fn subscribe_typing(&self, conversation_id: Uuid) -> mpsc::UnboundedReceiver<TypingEvent> {
        let mut channel_rx = {
            let mut typing = self.inner.typing.write().await;
            typing
                .entry(conversation_id)
                .or_insert_with(|| broadcast::channel(64).0)
                .subscribe()
        };
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match channel_rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Typing channel for {} lagged by {} events", conversation_id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        rx
    }
}

impl Default for FeedHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roost_types::models::MessageRecord;

    fn record(conversation_id: Uuid) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            conversation_id,
            author_id: Uuid::new_v4(),
            content: "hello".to_string(),
            created_at: chrono::Utc::now(),
            edited: false,
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn message_watch_filters_by_conversation() {
        let hub = FeedHub::new();
        let mine = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut rx = hub.watch_messages(mine).await;

        hub.publish(FeedEvent::Message(MessageEvent::Inserted(record(other))));
        let expected = record(mine);
        hub.publish(FeedEvent::Message(MessageEvent::Inserted(expected.clone())));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.message_id(), expected.id);
        assert_eq!(event.conversation_id(), mine);
    }

    #[tokio::test]
    async fn conversation_watch_sees_all_conversations() {
        let hub = FeedHub::new();
        let mut rx = hub.watch_conversations().await;

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        hub.publish(FeedEvent::Conversation(ConversationEvent::Inserted {
            conversation_id: a,
        }));
        hub.publish(FeedEvent::Conversation(ConversationEvent::Updated {
            conversation_id: b,
        }));

        assert_eq!(rx.recv().await.unwrap().conversation_id(), a);
        assert_eq!(rx.recv().await.unwrap().conversation_id(), b);
    }

    #[tokio::test]
    async fn typing_reaches_only_that_conversation() {
        let hub = FeedHub::new();
        let here = Uuid::new_v4();
        let elsewhere = Uuid::new_v4();
        let mut here_rx = hub.subscribe_typing(here).await;
        let mut elsewhere_rx = hub.subscribe_typing(elsewhere).await;

        let user = UserSummary {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
        };
        hub.publish_typing(here, user.clone()).await;

        let event = here_rx.recv().await.unwrap();
        assert_eq!(event.user, user);
        assert!(elsewhere_rx.try_recv().is_err());
    }
}
