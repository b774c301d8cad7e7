//! Outbound history events
//!
//! Every query, feed fetch, login and grab produces one [`IndexerEvent`].
//! The pipeline does not store them; a collaborator subscribes through an
//! [`EventSink`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Query,
    Rss,
    Auth,
    Grab,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerEvent {
    pub indexer_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub success: bool,
    pub elapsed_ms: u64,
    /// Releases returned; zero for auth and grab events
    pub release_count: usize,
    pub url: Option<String>,
}

impl IndexerEvent {
    pub fn new(indexer_id: impl Into<String>, event_type: EventType, success: bool) -> Self {
        Self {
            indexer_id: indexer_id.into(),
            timestamp: Utc::now(),
            event_type,
            success,
            elapsed_ms: 0,
            release_count: 0,
            url: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed: std::time::Duration) -> Self {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn with_releases(mut self, count: usize) -> Self {
        self.release_count = count;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Receiver of history events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: IndexerEvent);
}

/// Fans events out to any number of subscribers; events are dropped when
/// nobody listens.
pub struct BroadcastEventSink {
    tx: broadcast::Sender<IndexerEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexerEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: IndexerEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }
}

/// Discards everything
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: IndexerEvent) {}
}
