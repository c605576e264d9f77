/// Embedded backend: messages and a per-conversation change log in sled DB
///
/// Key layout (`<len>` is the byte length of the conversation id, so an id
/// containing ':' never shares a prefix with a shorter one):
///   msg:<len>:<conversation_id>:<id>    -> message JSON
///   idx:<id>                            -> conversation_id
///   feed:<len>:<conversation_id>:<seq>  -> feed event JSON, removed once published
///
/// The change feed is a `watch_prefix` on the conversation's feed keys.
use crate::error::{ChatError, Result};
use crate::messenger_types::{Message, MessagePatch, NewMessage};
use crate::remote::{
    ChangeFeed, FeedEvent, FeedFilter, FeedSubscription, Persistence, RecordRef, SubscriptionId,
    MESSAGES_TOPIC,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct SledBackend {
    db: sled::Db,
    feed_buffer: usize,
    next_subscription: Arc<AtomicU64>,
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, JoinHandle<()>>>>,
}

impl SledBackend {
    /// Open (or create) the backend under `data_dir`
    pub fn open(data_dir: &Path, feed_buffer: usize) -> Result<Self> {
        let db_path = data_dir.join("conversations.db");
        let db = sled::open(&db_path)
            .map_err(|e| ChatError::Storage(format!("Failed to open conversations DB: {}", e)))?;
        info!("Conversation backend opened at {:?}", db_path);
        Ok(Self::with_db(db, feed_buffer))
    }

    pub fn with_db(db: sled::Db, feed_buffer: usize) -> Self {
        Self {
            db,
            feed_buffer: feed_buffer.max(1),
            next_subscription: Arc::new(AtomicU64::new(1)),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of live feed subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    fn conversation_prefix(kind: &str, conversation_id: &str) -> String {
        format!("{}:{}:{}:", kind, conversation_id.len(), conversation_id)
    }

    fn message_key(conversation_id: &str, id: &str) -> String {
        format!("{}{}", Self::conversation_prefix("msg", conversation_id), id)
    }

    fn index_key(id: &str) -> String {
        format!("idx:{}", id)
    }

    fn feed_prefix(conversation_id: &str) -> String {
        Self::conversation_prefix("feed", conversation_id)
    }

    fn conversation_of(&self, id: &str) -> Result<String> {
        let value = self
            .db
            .get(Self::index_key(id).as_bytes())
            .map_err(|e| ChatError::Persistence(format!("lookup {}: {}", id, e)))?
            .ok_or_else(|| ChatError::NotFound(id.to_string()))?;
        String::from_utf8(value.to_vec())
            .map_err(|e| ChatError::Persistence(format!("corrupt index for {}: {}", id, e)))
    }

    fn write_message(&self, message: &Message) -> Result<()> {
        let value = serde_json::to_vec(message)?;
        self.db
            .insert(
                Self::message_key(&message.conversation_id, &message.id).as_bytes(),
                value,
            )
            .map_err(|e| ChatError::Persistence(format!("write {}: {}", message.id, e)))?;
        Ok(())
    }

    /// Write one event under the conversation's feed prefix. Watchers see the
    /// insert; the entry is removed right after so the log does not grow.
    fn publish(&self, conversation_id: &str, event: &FeedEvent) -> Result<()> {
        let seq = self
            .db
            .generate_id()
            .map_err(|e| ChatError::Persistence(format!("feed sequence: {}", e)))?;
        let key = format!("{}{:020}", Self::feed_prefix(conversation_id), seq);
        self.db
            .insert(key.as_bytes(), event.encode()?)
            .map_err(|e| ChatError::Persistence(format!("feed append: {}", e)))?;
        self.db
            .remove(key.as_bytes())
            .map_err(|e| ChatError::Persistence(format!("feed trim: {}", e)))?;
        debug!("Published {} for {}", key, event.record_id());
        Ok(())
    }
}

#[async_trait]
impl Persistence for SledBackend {
    async fn create_message(&self, new: NewMessage) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            recipient_id: new.recipient_id,
            sender_role: Default::default(),
            content: new.content,
            created_at: Utc::now(),
            edited_at: None,
            is_edited: false,
            is_pinned: false,
            deleted_at: None,
            reactions: Vec::new(),
            attachments: Vec::new(),
            thread_id: None,
            reply_to: None,
        };

        let mut batch = sled::Batch::default();
        batch.insert(
            Self::message_key(&message.conversation_id, &message.id).as_bytes(),
            serde_json::to_vec(&message)?,
        );
        batch.insert(
            Self::index_key(&message.id).as_bytes(),
            message.conversation_id.as_bytes(),
        );
        self.db
            .apply_batch(batch)
            .map_err(|e| ChatError::Persistence(format!("create {}: {}", message.id, e)))?;
        self.publish(
            &message.conversation_id,
            &FeedEvent::Insert {
                record: message.clone(),
            },
        )?;
        Ok(message)
    }

    async fn update_message(&self, id: &str, patch: &MessagePatch) -> Result<()> {
        let mut message = self.read_message(id).await?;
        patch.apply_to(&mut message);
        self.write_message(&message)?;
        let conversation_id = message.conversation_id.clone();
        self.publish(&conversation_id, &FeedEvent::Update { record: message })
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        let conversation_id = self.conversation_of(id)?;
        let mut batch = sled::Batch::default();
        batch.remove(Self::message_key(&conversation_id, id).as_bytes());
        batch.remove(Self::index_key(id).as_bytes());
        self.db
            .apply_batch(batch)
            .map_err(|e| ChatError::Persistence(format!("delete {}: {}", id, e)))?;
        self.publish(
            &conversation_id,
            &FeedEvent::Delete {
                record: RecordRef {
                    id: id.to_string(),
                    conversation_id: Some(conversation_id.clone()),
                },
            },
        )
    }

    async fn read_message(&self, id: &str) -> Result<Message> {
        let conversation_id = self.conversation_of(id)?;
        let value = self
            .db
            .get(Self::message_key(&conversation_id, id).as_bytes())
            .map_err(|e| ChatError::Persistence(format!("read {}: {}", id, e)))?
            .ok_or_else(|| ChatError::NotFound(id.to_string()))?;
        Ok(serde_json::from_slice(&value)?)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let prefix = Self::conversation_prefix("msg", conversation_id);
        let mut messages = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, value) =
                entry.map_err(|e| ChatError::Fetch(format!("scan {}: {}", conversation_id, e)))?;
            let message: Message = serde_json::from_slice(&value)
                .map_err(|e| ChatError::Fetch(format!("corrupt record: {}", e)))?;
            if message.conversation_id == conversation_id {
                messages.push(message);
            }
        }
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}

#[async_trait]
impl ChangeFeed for SledBackend {
    async fn subscribe(&self, topic: &str, filter: &FeedFilter) -> Result<FeedSubscription> {
        if topic != MESSAGES_TOPIC {
            return Err(ChatError::Subscription(format!("unknown topic '{}'", topic)));
        }

        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut subscriber = self
            .db
            .watch_prefix(Self::feed_prefix(&filter.conversation_id).as_bytes());
        let (tx, rx) = mpsc::channel(self.feed_buffer);

        let conversation_id = filter.conversation_id.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = (&mut subscriber).await {
                if let sled::Event::Insert { value, .. } = event {
                    if tx.send(value.to_vec()).await.is_err() {
                        break;
                    }
                }
            }
            debug!("Feed watcher for {} finished", conversation_id);
        });

        self.subscriptions.lock().await.insert(id, pump);
        debug!("Subscription {:?} opened for {}", id, filter.conversation_id);
        Ok(FeedSubscription { id, events: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        match self.subscriptions.lock().await.remove(&id) {
            Some(pump) => {
                pump.abort();
                debug!("Subscription {:?} closed", id);
            }
            None => debug!("Subscription {:?} already closed", id),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn new_message(conversation_id: &str, content: &str) -> NewMessage {
        NewMessage {
            conversation_id: conversation_id.to_string(),
            sender_id: "alice".to_string(),
            recipient_id: "bob".to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_read_list() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::open(temp_dir.path(), 16).unwrap();

        let first = backend.create_message(new_message("c1", "one")).await.unwrap();
        let second = backend.create_message(new_message("c1", "two")).await.unwrap();
        backend.create_message(new_message("c2", "elsewhere")).await.unwrap();

        assert_ne!(first.id, second.id);
        assert!(!first.is_edited);
        assert!(first.reactions.is_empty());

        let read = backend.read_message(&second.id).await.unwrap();
        assert_eq!(read.content, "two");

        let listed = backend.list_messages("c1").await.unwrap();
        let contents: Vec<&str> = listed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::open(temp_dir.path(), 16).unwrap();
        let msg = backend.create_message(new_message("c1", "draft")).await.unwrap();

        backend
            .update_message(&msg.id, &MessagePatch::pinned(true))
            .await
            .unwrap();
        assert!(backend.read_message(&msg.id).await.unwrap().is_pinned);

        backend.delete_message(&msg.id).await.unwrap();
        assert!(matches!(
            backend.read_message(&msg.id).await,
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            backend.update_message(&msg.id, &MessagePatch::pinned(false)).await,
            Err(ChatError::NotFound(_))
        ));
        assert!(backend.list_messages("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_feed_delivers_scoped_events() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::open(temp_dir.path(), 16).unwrap();
        let filter = FeedFilter {
            conversation_id: "c1".to_string(),
        };
        let mut sub = backend.subscribe(MESSAGES_TOPIC, &filter).await.unwrap();

        backend.create_message(new_message("c2", "not for us")).await.unwrap();
        let created = backend.create_message(new_message("c1", "for us")).await.unwrap();

        let raw = timeout(Duration::from_secs(2), sub.events.recv())
            .await
            .unwrap()
            .unwrap();
        match FeedEvent::decode(&raw).unwrap() {
            FeedEvent::Insert { record } => assert_eq!(record.id, created.id),
            other => panic!("unexpected event {:?}", other),
        }

        backend.unsubscribe(sub.id).await.unwrap();
        assert_eq!(backend.subscription_count().await, 0);
        // second unsubscribe is harmless
        backend.unsubscribe(sub.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_conversation_ids_with_colons_stay_separate() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::open(temp_dir.path(), 16).unwrap();
        let filter = FeedFilter {
            conversation_id: "team".to_string(),
        };
        let mut sub = backend.subscribe(MESSAGES_TOPIC, &filter).await.unwrap();

        backend
            .create_message(new_message("team:1", "private to team:1"))
            .await
            .unwrap();
        let own = backend.create_message(new_message("team", "general")).await.unwrap();

        let listed = backend.list_messages("team").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, own.id);
        assert_eq!(backend.list_messages("team:1").await.unwrap().len(), 1);

        // The first event the "team" watcher sees is its own insert
        let raw = timeout(Duration::from_secs(2), sub.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(FeedEvent::decode(&raw).unwrap().record_id(), own.id);
    }

    #[tokio::test]
    async fn test_feed_entries_are_not_retained() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::open(temp_dir.path(), 16).unwrap();
        let filter = FeedFilter {
            conversation_id: "c1".to_string(),
        };
        let mut sub = backend.subscribe(MESSAGES_TOPIC, &filter).await.unwrap();

        let msg = backend.create_message(new_message("c1", "draft")).await.unwrap();
        backend
            .update_message(&msg.id, &MessagePatch::pinned(true))
            .await
            .unwrap();
        backend.delete_message(&msg.id).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let raw = timeout(Duration::from_secs(2), sub.events.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(FeedEvent::decode(&raw).unwrap());
        }
        assert!(matches!(seen[0], FeedEvent::Insert { .. }));
        assert!(matches!(seen[1], FeedEvent::Update { .. }));
        assert!(matches!(seen[2], FeedEvent::Delete { .. }));

        assert_eq!(backend.db.scan_prefix(b"feed:").count(), 0);
    }

    #[tokio::test]
    async fn test_create_writes_record_and_index_together() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::open(temp_dir.path(), 16).unwrap();
        let msg = backend.create_message(new_message("c1", "hello")).await.unwrap();

        assert_eq!(backend.conversation_of(&msg.id).unwrap(), "c1");
        assert!(backend
            .db
            .get(SledBackend::message_key("c1", &msg.id).as_bytes())
            .unwrap()
            .is_some());
        assert_eq!(backend.read_message(&msg.id).await.unwrap().content, "hello");

        backend.delete_message(&msg.id).await.unwrap();
        assert!(backend.db.scan_prefix(b"idx:").next().is_none());
        assert!(backend.db.scan_prefix(b"msg:").next().is_none());
    }

    #[tokio::test]
    async fn test_unknown_topic_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::open(temp_dir.path(), 16).unwrap();
        let filter = FeedFilter {
            conversation_id: "c1".to_string(),
        };
        let err = backend.subscribe("profiles", &filter).await.unwrap_err();
        assert!(matches!(err, ChatError::Subscription(_)));
    }
}
