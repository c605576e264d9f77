/// Contracts with the remote side: the persistence/query surface and the
/// change-feed subscription surface, plus the feed wire format.
use crate::error::{ChatError, Result};
use crate::messenger_types::{Message, MessagePatch, NewMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

/// Topic carrying message changes
pub const MESSAGES_TOPIC: &str = "messages";

/// Record-level access to stored messages.
///
/// Implementations assign `id` and `created_at` on create. Records are
/// returned with `sender_role` unset; callers derive it for their viewer.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn create_message(&self, new: NewMessage) -> Result<Message>;

    async fn update_message(&self, id: &str, patch: &MessagePatch) -> Result<()>;

    async fn delete_message(&self, id: &str) -> Result<()>;

    async fn read_message(&self, id: &str) -> Result<Message>;

    /// All messages of a conversation, ascending by `created_at`
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;
}

/// Scope of a feed subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilter {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Live subscription: raw encoded events arrive on `events` until
/// [`ChangeFeed::unsubscribe`] is called or the feed goes away.
#[derive(Debug)]
pub struct FeedSubscription {
    pub id: SubscriptionId,
    pub events: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, topic: &str, filter: &FeedFilter) -> Result<FeedSubscription>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

/// Identifies a deleted record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// One change notification as it travels on the feed:
/// `{"eventType": "insert", "record": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "lowercase")]
pub enum FeedEvent {
    Insert { record: Message },
    Update { record: Message },
    Delete { record: RecordRef },
}

impl FeedEvent {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| ChatError::Decode(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn record_id(&self) -> &str {
        match self {
            FeedEvent::Insert { record } | FeedEvent::Update { record } => &record.id,
            FeedEvent::Delete { record } => &record.id,
        }
    }

    /// Conversation the event belongs to, when the payload says
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            FeedEvent::Insert { record } | FeedEvent::Update { record } => {
                Some(&record.conversation_id)
            }
            FeedEvent::Delete { record } => record.conversation_id.as_deref(),
        }
    }
}

/// Bound a remote call. Expiry becomes [`ChatError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ChatError::Timeout(format!(
            "{} did not complete within {:?}",
            what, limit
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_insert_event() {
        let payload = r#"{
            "eventType": "insert",
            "record": {
                "id": "m1",
                "conversation_id": "c1",
                "sender_id": "alice",
                "recipient_id": "bob",
                "content": "hello",
                "created_at": "2026-02-10T08:30:00Z",
                "reactions": [{"emoji": "👍", "count": 2}],
                "attachments": [{"name": "a.png", "url": "https://x/a.png", "type": "image/png"}]
            }
        }"#
        .as_bytes();
        let event = FeedEvent::decode(payload).unwrap();
        match &event {
            FeedEvent::Insert { record } => {
                assert_eq!(record.content, "hello");
                assert_eq!(record.reactions[0].count, 2);
                assert_eq!(record.attachments[0].kind, "image/png");
            }
            other => panic!("expected insert, got {:?}", other),
        }
        assert_eq!(event.record_id(), "m1");
        assert_eq!(event.conversation_id(), Some("c1"));
    }

    #[test]
    fn test_decode_delete_event_with_bare_id() {
        let event = FeedEvent::decode(br#"{"eventType":"delete","record":{"id":"m7"}}"#).unwrap();
        assert_eq!(
            event,
            FeedEvent::Delete {
                record: RecordRef {
                    id: "m7".to_string(),
                    conversation_id: None
                }
            }
        );
        assert_eq!(event.conversation_id(), None);
    }

    #[test]
    fn test_decode_rejects_unknown_event_type() {
        let err = FeedEvent::decode(br#"{"eventType":"truncate","record":{"id":"m7"}}"#)
            .unwrap_err();
        assert!(matches!(err, ChatError::Decode(_)));
        assert!(FeedEvent::decode(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ChatError>(())
        };
        let result = with_timeout(Duration::from_millis(20), "slow call", slow).await;
        assert!(matches!(result, Err(ChatError::Timeout(_))));

        let fast = async { Ok::<_, ChatError>(7) };
        assert_eq!(with_timeout(Duration::from_secs(1), "fast", fast).await.unwrap(), 7);
    }
}
