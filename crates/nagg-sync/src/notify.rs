//! Change notification: bounded `ArticleUpdated` events handed to a pub/sub transport.

use std::sync::Arc;

use async_trait::async_trait;
use nagg_core::{Article, ChangeEvent, ARTICLES_CHANNEL, ARTICLE_UPDATED_EVENT, CHANGE_EVENT_MAX_BYTES};
use nagg_storage::UpsertOutcome;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    pub channel: String,
    pub event: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast transport failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: Vec<u8>) -> Result<(), BroadcastError>;
}

/// In-process transport on a tokio broadcast channel. Feeds the SSE endpoint.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn publish(&self, channel: &str, event: &str, payload: Vec<u8>) -> Result<(), BroadcastError> {
        let message = BroadcastMessage {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        };
        // No live subscribers is normal between client connections.
        if self.sender.send(message).is_err() {
            debug!(channel, event, "no subscribers for broadcast");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Published { bytes: usize },
    Dropped { bytes: usize },
    Failed,
    NotNeeded,
}

pub struct ChangeNotifier {
    broadcaster: Arc<dyn Broadcaster>,
    max_bytes: usize,
}

impl ChangeNotifier {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            broadcaster,
            max_bytes: CHANGE_EVENT_MAX_BYTES,
        }
    }

    /// Emits the change event for a created or changed article. Oversized events are dropped
    /// whole; the stored article is unaffected either way.
    pub async fn publish(&self, outcome: &UpsertOutcome, category: &str) -> NotifyOutcome {
        if !outcome.needs_notification() {
            return NotifyOutcome::NotNeeded;
        }
        let payload = match encode_event(&outcome.article) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(category, title = %outcome.article.title, error = %err, "could not encode change event");
                return NotifyOutcome::Failed;
            }
        };

        let bytes = payload.len();
        if bytes > self.max_bytes {
            warn!(
                category,
                title = %outcome.article.title,
                bytes,
                limit = self.max_bytes,
                "change event too large; skipping broadcast"
            );
            return NotifyOutcome::Dropped { bytes };
        }

        self.send(payload).await
    }

    /// Tells subscribers the article set was emptied.
    pub async fn publish_reset(&self) -> NotifyOutcome {
        self.send(b"[]".to_vec()).await
    }

    async fn send(&self, payload: Vec<u8>) -> NotifyOutcome {
        let bytes = payload.len();
        match self
            .broadcaster
            .publish(ARTICLES_CHANNEL, ARTICLE_UPDATED_EVENT, payload)
            .await
        {
            Ok(()) => NotifyOutcome::Published { bytes },
            Err(err) => {
                warn!(error = %err, "change event broadcast failed");
                NotifyOutcome::Failed
            }
        }
    }
}

pub fn encode_event(article: &Article) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&ChangeEvent::from(article))
}
