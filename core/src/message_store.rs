/// Message store: the ordered, in-memory message list of one conversation
/// Sorted by created_at at all times; one entry per id
use crate::error::{ChatError, Result};
use crate::messenger_types::{Message, MessagePatch, Reaction};
use crate::remote::{with_timeout, Persistence};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

/// Change notifications for UI consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// The whole list was swapped out (conversation load)
    Replaced { count: usize },
    /// A message was inserted or replaced
    Upserted { message: Message },
    /// Some fields of a message changed
    Patched { id: String },
    /// A message left the list
    Removed { id: String },
    /// Store emptied on teardown
    Cleared,
}

#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full refresh. Input order does not matter; duplicate ids collapse
    /// into one entry.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages.clear();
        for message in messages {
            self.upsert(message);
        }
    }

    /// Insert or replace by id. Returns `true` when a new entry was added.
    ///
    /// A replacement keeps the stored `created_at`, so it also keeps its
    /// position. New entries go after every message created at or before
    /// them.
    pub fn upsert(&mut self, mut message: Message) -> bool {
        if let Some(pos) = self.position(&message.id) {
            let existing = &self.messages[pos];
            if existing.created_at != message.created_at {
                debug!(
                    "Ignoring created_at change for {} ({} -> {})",
                    message.id, existing.created_at, message.created_at
                );
                message.created_at = existing.created_at;
            }
            self.messages[pos] = message;
            false
        } else {
            let idx = self
                .messages
                .partition_point(|m| m.created_at <= message.created_at);
            self.messages.insert(idx, message);
            true
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let pos = self.position(id)?;
        Some(self.messages.remove(pos))
    }

    /// Apply a partial update. Missing ids are a no-op: a patch can lose the
    /// race against a delete.
    pub fn patch(&mut self, id: &str, patch: &MessagePatch) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                patch.apply_to(message);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
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

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Pinned messages, in conversation order
    pub fn pinned(&self) -> Vec<Message> {
        self.messages.iter().filter(|m| m.is_pinned).cloned().collect()
    }

    /// Per-emoji totals across the conversation, in first-seen order
    pub fn reaction_totals(&self) -> Vec<Reaction> {
        let mut totals: Vec<Reaction> = Vec::new();
        for reaction in self.messages.iter().flat_map(|m| m.reactions.iter()) {
            match totals.iter_mut().find(|t| t.emoji == reaction.emoji) {
                Some(total) => total.count = total.count.saturating_add(reaction.count),
                None => totals.push(reaction.clone()),
            }
        }
        totals
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }
}

/// Store handle shared by the mutation gateway, the feed listener and UI
/// readers. Every mutation runs under the write lock and is announced on a
/// broadcast channel afterwards.
#[derive(Clone)]
pub struct SharedMessageStore {
    inner: Arc<RwLock<MessageStore>>,
    events: broadcast::Sender<StoreEvent>,
}

impl SharedMessageStore {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: Arc::new(RwLock::new(MessageStore::new())),
            events,
        }
    }

    /// Fetch the conversation history and make it the store content.
    /// On failure the store is left empty.
    pub async fn load(
        &self,
        persistence: &dyn Persistence,
        conversation_id: &str,
        viewer_id: Option<&str>,
        limit: Duration,
    ) -> Result<Vec<Message>> {
        self.clear().await;

        let records = with_timeout(limit, "list_messages", persistence.list_messages(conversation_id))
            .await
            .map_err(|e| {
                warn!("Failed to load conversation {}: {}", conversation_id, e);
                match e {
                    ChatError::Fetch(_) => e,
                    other => ChatError::Fetch(other.to_string()),
                }
            })?;

        let messages: Vec<Message> = records
            .into_iter()
            .map(|m| m.for_viewer(viewer_id))
            .collect();
        self.replace_all(messages).await;
        Ok(self.snapshot().await)
    }

    pub async fn replace_all(&self, messages: Vec<Message>) {
        let count = {
            let mut store = self.inner.write().await;
            store.replace_all(messages);
            store.len()
        };
        let _ = self.events.send(StoreEvent::Replaced { count });
    }

    pub async fn upsert(&self, message: Message) -> bool {
        let inserted = self.inner.write().await.upsert(message.clone());
        let _ = self.events.send(StoreEvent::Upserted { message });
        inserted
    }

    pub async fn remove(&self, id: &str) -> Option<Message> {
        let removed = self.inner.write().await.remove(id);
        if removed.is_some() {
            let _ = self.events.send(StoreEvent::Removed { id: id.to_string() });
        }
        removed
    }

    pub async fn patch(&self, id: &str, patch: &MessagePatch) -> bool {
        let applied = self.inner.write().await.patch(id, patch);
        if applied {
            let _ = self.events.send(StoreEvent::Patched { id: id.to_string() });
        } else {
            debug!("Patch for unknown message {} ignored", id);
        }
        applied
    }

    pub async fn clear(&self) {
        let mut store = self.inner.write().await;
        if !store.is_empty() {
            store.clear();
            let _ = self.events.send(StoreEvent::Cleared);
        }
    }

    pub async fn get(&self, id: &str) -> Option<Message> {
        self.inner.read().await.get(id).cloned()
    }

    /// Copy of the ordered message list
    pub async fn snapshot(&self) -> Vec<Message> {
        self.inner.read().await.messages().to_vec()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn pinned(&self) -> Vec<Message> {
        self.inner.read().await.pinned()
    }

    pub async fn reaction_totals(&self) -> Vec<Reaction> {
        self.inner.read().await.reaction_totals()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
