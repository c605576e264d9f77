/// Mutation gateway: user intents -> remote persistence -> local store
///
/// Send and react are fire-and-forget: failures are logged and reported as
/// [`Delivery::Dropped`], never as `Err`. Edit, delete and pin propagate
/// failures and leave the store untouched.
use crate::edit_policy::can_edit;
use crate::error::{ChatError, Result};
use crate::message_store::SharedMessageStore;
use crate::messenger_types::{ConversationScope, MessagePatch, NewMessage, Reaction};
use crate::reactions::apply_reaction;
use crate::remote::{with_timeout, Persistence};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a fire-and-forget mutation
#[derive(Debug)]
pub enum Delivery {
    /// The remote call succeeded
    Delivered,
    /// Rejected locally before any remote call (blank input, no viewer)
    Ignored,
    /// The remote call failed; the error was logged and swallowed
    Dropped(ChatError),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

pub struct MutationGateway {
    persistence: Arc<dyn Persistence>,
    store: SharedMessageStore,
    scope: ConversationScope,
    viewer_id: Option<String>,
    request_timeout: Duration,
}

impl MutationGateway {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        store: SharedMessageStore,
        scope: ConversationScope,
        viewer_id: Option<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            persistence,
            store,
            scope,
            viewer_id,
            request_timeout,
        }
    }

    pub fn scope(&self) -> &ConversationScope {
        &self.scope
    }

    /// Create a message. The store is not touched here: the message shows
    /// up once the change feed echoes the insert.
    pub async fn send(&self, content: &str) -> Delivery {
        let content = content.trim();
        let Some(viewer_id) = self.viewer_id.as_deref() else {
            debug!("Send ignored: no authenticated viewer");
            return Delivery::Ignored;
        };
        if content.is_empty() {
            debug!("Send ignored: empty content");
            return Delivery::Ignored;
        }

        let new = NewMessage {
            conversation_id: self.scope.conversation_id.clone(),
            sender_id: viewer_id.to_string(),
            recipient_id: self.scope.counterparty_id.clone(),
            content: content.to_string(),
        };
        match with_timeout(
            self.request_timeout,
            "create_message",
            self.persistence.create_message(new),
        )
        .await
        {
            Ok(message) => {
                debug!("Message {} created in {}", message.id, self.scope.conversation_id);
                Delivery::Delivered
            }
            Err(e) => {
                warn!("Send to {} dropped: {}", self.scope.conversation_id, e);
                Delivery::Dropped(e)
            }
        }
    }

    /// Replace the content of one of the viewer's own messages while the
    /// edit window allows it
    pub async fn edit(&self, id: &str, content: &str) -> Result<()> {
        let viewer_id = self.viewer_id.as_deref().ok_or(ChatError::NoViewer)?;
        let current = self
            .store
            .get(id)
            .await
            .ok_or_else(|| ChatError::NotFound(id.to_string()))?;

        let now = Utc::now();
        if !can_edit(&current, current.is_owned_by(viewer_id), now) {
            debug!("Edit of {} by {} refused", id, viewer_id);
            return Err(ChatError::EditNotAllowed(id.to_string()));
        }

        let patch = MessagePatch::edit(content, now);
        self.remote_update(id, &patch).await?;
        self.store.patch(id, &patch).await;
        info!("Message {} edited", id);
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.require_local(id).await?;
        with_timeout(
            self.request_timeout,
            "delete_message",
            self.persistence.delete_message(id),
        )
        .await
        .inspect_err(|e| warn!("Delete of {} failed: {}", id, e))?;
        self.store.remove(id).await;
        info!("Message {} deleted", id);
        Ok(())
    }

    pub async fn pin(&self, id: &str) -> Result<()> {
        self.set_pinned(id, true).await
    }

    pub async fn unpin(&self, id: &str) -> Result<()> {
        self.set_pinned(id, false).await
    }

    /// Pin if currently unpinned and vice versa. Returns the new state.
    pub async fn toggle_pin(&self, id: &str) -> Result<bool> {
        let current = self
            .store
            .get(id)
            .await
            .ok_or_else(|| ChatError::NotFound(id.to_string()))?;
        let target = !current.is_pinned;
        self.set_pinned(id, target).await?;
        Ok(target)
    }

    /// Count one more `emoji` on a message.
    ///
    /// Reads the current reactions, increments locally and writes the whole
    /// list back. Nothing guards the read against a concurrent writer, so two
    /// simultaneous reactions can collapse into one.
    pub async fn react(&self, id: &str, emoji: &str) -> Delivery {
        if self.viewer_id.is_none() || emoji.trim().is_empty() {
            debug!("Reaction on {} ignored", id);
            return Delivery::Ignored;
        }
        match self.react_remote(id, emoji).await {
            Ok(reactions) => {
                self.store.patch(id, &MessagePatch::reactions(reactions)).await;
                Delivery::Delivered
            }
            Err(e) => {
                warn!("Reaction {} on {} dropped: {}", emoji, id, e);
                Delivery::Dropped(e)
            }
        }
    }

    async fn react_remote(&self, id: &str, emoji: &str) -> Result<Vec<Reaction>> {
        self.require_local(id).await?;
        let current = with_timeout(
            self.request_timeout,
            "read_message",
            self.persistence.read_message(id),
        )
        .await?;
        let reactions = apply_reaction(&current.reactions, emoji);
        with_timeout(
            self.request_timeout,
            "update_message",
            self.persistence
                .update_message(id, &MessagePatch::reactions(reactions.clone())),
        )
        .await?;
        Ok(reactions)
    }

    async fn set_pinned(&self, id: &str, is_pinned: bool) -> Result<()> {
        self.require_local(id).await?;
        let patch = MessagePatch::pinned(is_pinned);
        self.remote_update(id, &patch).await?;
        self.store.patch(id, &patch).await;
        info!("Message {} pinned={}", id, is_pinned);
        Ok(())
    }

    async fn remote_update(&self, id: &str, patch: &MessagePatch) -> Result<()> {
        with_timeout(
            self.request_timeout,
            "update_message",
            self.persistence.update_message(id, patch),
        )
        .await
        .inspect_err(|e| warn!("Update of {} failed: {}", id, e))
    }

    /// Mutations only target messages of the active conversation
    async fn require_local(&self, id: &str) -> Result<()> {
        match self.store.get(id).await {
            Some(_) => Ok(()),
            None => Err(ChatError::NotFound(id.to_string())),
        }
    }
}
