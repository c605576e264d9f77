/// Change-feed listener: one live subscription per active conversation,
/// decoded events merged into the message store
use crate::error::{ChatError, Result};
use crate::message_store::SharedMessageStore;
use crate::remote::{with_timeout, ChangeFeed, FeedEvent, FeedFilter, SubscriptionId, MESSAGES_TOPIC};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct ActiveFeed {
    conversation_id: String,
    subscription: SubscriptionId,
    pump: JoinHandle<()>,
}

pub struct ChangeFeedListener {
    feed: Arc<dyn ChangeFeed>,
    store: SharedMessageStore,
    viewer_id: Option<String>,
    request_timeout: Duration,
    active: Mutex<Option<ActiveFeed>>,
}

impl ChangeFeedListener {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        store: SharedMessageStore,
        viewer_id: Option<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            feed,
            store,
            viewer_id,
            request_timeout,
            active: Mutex::new(None),
        }
    }

    pub async fn activate(&self, conversation_id: &str) -> Result<()> {
        self.activate_with(conversation_id, async { Ok(()) }).await
    }

    /// Subscribe to `conversation_id`, run `before_pump`, then start applying
    /// events.
    ///
    /// Events that arrive while `before_pump` runs (typically the initial
    /// load) stay queued and are applied afterwards, so nothing slips between
    /// the history fetch and the live feed. Any previous subscription is torn
    /// down and the store emptied before subscribing, so a failed activation
    /// leaves no messages behind. If `before_pump` fails the new subscription
    /// is dropped too.
    pub async fn activate_with<T, F>(&self, conversation_id: &str, before_pump: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.teardown(previous).await;
        }
        self.store.clear().await;

        let filter = FeedFilter {
            conversation_id: conversation_id.to_string(),
        };
        let subscription = with_timeout(
            self.request_timeout,
            "subscribe",
            self.feed.subscribe(MESSAGES_TOPIC, &filter),
        )
        .await
        .map_err(|e| match e {
            ChatError::Subscription(_) => e,
            other => ChatError::Subscription(other.to_string()),
        })?;

        let value = match before_pump.await {
            Ok(value) => value,
            Err(e) => {
                if let Err(unsub) = self.unsubscribe(subscription.id).await {
                    warn!("Unsubscribe after failed activation: {}", unsub);
                }
                return Err(e);
            }
        };

        let pump = tokio::spawn(run_pump(
            subscription.events,
            self.store.clone(),
            conversation_id.to_string(),
            self.viewer_id.clone(),
        ));
        *active = Some(ActiveFeed {
            conversation_id: conversation_id.to_string(),
            subscription: subscription.id,
            pump,
        });
        info!("Listening for changes in {}", conversation_id);
        Ok(value)
    }

    pub async fn deactivate(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            self.teardown(previous).await;
        }
    }

    /// Conversation currently subscribed to, if the feed is still running
    pub async fn active_conversation(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|a| !a.pump.is_finished())
            .map(|a| a.conversation_id.clone())
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        with_timeout(self.request_timeout, "unsubscribe", self.feed.unsubscribe(id)).await
    }

    /// Stop the pump and wait for it, so no event from the old feed reaches
    /// the store after this returns
    async fn teardown(&self, feed: ActiveFeed) {
        feed.pump.abort();
        if let Err(e) = feed.pump.await {
            if !e.is_cancelled() {
                error!("Feed pump for {} panicked: {}", feed.conversation_id, e);
            }
        }
        if let Err(e) = self.unsubscribe(feed.subscription).await {
            error!("Failed to unsubscribe from {}: {}", feed.conversation_id, e);
        }
        debug!("Stopped listening to {}", feed.conversation_id);
    }
}

async fn run_pump(
    mut events: mpsc::Receiver<Vec<u8>>,
    store: SharedMessageStore,
    conversation_id: String,
    viewer_id: Option<String>,
) {
    while let Some(payload) = events.recv().await {
        match FeedEvent::decode(&payload) {
            Ok(event) => {
                apply_event(&store, &conversation_id, viewer_id.as_deref(), event).await;
            }
            Err(e) => warn!("Skipping feed event for {}: {}", conversation_id, e),
        }
    }
    info!("Change feed for {} closed", conversation_id);
}

/// Merge one decoded event into the store. Returns whether the store changed.
pub async fn apply_event(
    store: &SharedMessageStore,
    conversation_id: &str,
    viewer_id: Option<&str>,
    event: FeedEvent,
) -> bool {
    if let Some(owner) = event.conversation_id() {
        if owner != conversation_id {
            debug!("Ignoring event for {} while in {}", owner, conversation_id);
            return false;
        }
    }
    match event {
        FeedEvent::Insert { record } | FeedEvent::Update { record } => {
            store.upsert(record.for_viewer(viewer_id)).await;
            true
        }
        FeedEvent::Delete { record } => store.remove(&record.id).await.is_some(),
    }
}
