/// Conversation session: store, mutation gateway and change-feed listener
/// for the one conversation the viewer has open
use crate::change_feed::ChangeFeedListener;
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::message_store::{SharedMessageStore, StoreEvent};
use crate::messenger_types::{ConversationScope, Message, Reaction};
use crate::mutation_gateway::{Delivery, MutationGateway};
use crate::remote::{ChangeFeed, Persistence};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

pub struct ConversationSession {
    config: Config,
    persistence: Arc<dyn Persistence>,
    store: SharedMessageStore,
    listener: ChangeFeedListener,
    gateway: RwLock<Option<Arc<MutationGateway>>>,
}

impl ConversationSession {
    pub fn new(config: Config, persistence: Arc<dyn Persistence>, feed: Arc<dyn ChangeFeed>) -> Self {
        let store = SharedMessageStore::new(config.store_event_capacity);
        let listener = ChangeFeedListener::new(
            feed,
            store.clone(),
            config.viewer_id.clone(),
            config.request_timeout,
        );
        Self {
            config,
            persistence,
            store,
            listener,
            gateway: RwLock::new(None),
        }
    }

    pub fn viewer_id(&self) -> Option<&str> {
        self.config.viewer_id.as_deref()
    }

    /// Make `scope` the active conversation: load its history and start
    /// listening for changes. Whatever was open before is torn down first.
    /// On failure the store stays empty and no conversation is active.
    pub async fn open(&self, scope: ConversationScope) -> Result<Vec<Message>> {
        *self.gateway.write().await = None;

        let load = self.store.load(
            self.persistence.as_ref(),
            &scope.conversation_id,
            self.viewer_id(),
            self.config.request_timeout,
        );
        let messages = self
            .listener
            .activate_with(&scope.conversation_id, load)
            .await?;

        info!(
            "Opened conversation {} with {} messages",
            scope.conversation_id,
            messages.len()
        );
        *self.gateway.write().await = Some(Arc::new(MutationGateway::new(
            self.persistence.clone(),
            self.store.clone(),
            scope,
            self.config.viewer_id.clone(),
            self.config.request_timeout,
        )));
        Ok(messages)
    }

    pub async fn switch_to(&self, scope: ConversationScope) -> Result<Vec<Message>> {
        self.open(scope).await
    }

    /// Stop listening and discard the store
    pub async fn close(&self) {
        if let Some(gateway) = self.gateway.write().await.take() {
            debug!("Closing conversation {}", gateway.scope().conversation_id);
        }
        self.listener.deactivate().await;
        self.store.clear().await;
    }

    pub async fn active_scope(&self) -> Option<ConversationScope> {
        self.gateway
            .read()
            .await
            .as_ref()
            .map(|g| g.scope().clone())
    }

    /// Current ordered message list
    pub async fn messages(&self) -> Vec<Message> {
        self.store.snapshot().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn store(&self) -> &SharedMessageStore {
        &self.store
    }

    pub async fn pinned(&self) -> Vec<Message> {
        self.store.pinned().await
    }

    pub async fn reaction_totals(&self) -> Vec<Reaction> {
        self.store.reaction_totals().await
    }

    pub async fn send(&self, content: &str) -> Delivery {
        match self.gateway().await {
            Ok(gateway) => gateway.send(content).await,
            Err(_) => {
                debug!("Send ignored: no open conversation");
                Delivery::Ignored
            }
        }
    }

    pub async fn edit(&self, id: &str, content: &str) -> Result<()> {
        self.gateway().await?.edit(id, content).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.gateway().await?.delete(id).await
    }

    pub async fn pin(&self, id: &str) -> Result<()> {
        self.gateway().await?.pin(id).await
    }

    pub async fn unpin(&self, id: &str) -> Result<()> {
        self.gateway().await?.unpin(id).await
    }

    pub async fn toggle_pin(&self, id: &str) -> Result<bool> {
        self.gateway().await?.toggle_pin(id).await
    }

    pub async fn react(&self, id: &str, emoji: &str) -> Delivery {
        match self.gateway().await {
            Ok(gateway) => gateway.react(id, emoji).await,
            Err(_) => Delivery::Ignored,
        }
    }

    async fn gateway(&self) -> Result<Arc<MutationGateway>> {
        self.gateway
            .read()
            .await
            .clone()
            .ok_or(ChatError::NoConversation)
    }
}
