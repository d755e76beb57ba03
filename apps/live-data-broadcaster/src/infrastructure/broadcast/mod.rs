//! Broadcast Channel Adapters
//!
//! Implements message distribution using tokio broadcast channels
//! for efficient fan-out to multiple subscribers.
//!
//! # Architecture
//!
//! The `BroadcastHub` keeps one channel per destination, created on the
//! first subscription to it and dropped once its last receiver is gone.
//! Every STOMP subscription holds its own receiver, so slow consumers lag
//! independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::application::ports::{LiveDataPublisher, PublishError};
use crate::domain::live_data::LiveDataMessage;
use crate::domain::topic::Topic;
use crate::infrastructure::config::BroadcastSettings;

/// Content type of JSON payloads.
pub const JSON_CONTENT_TYPE: &str = "application/json";

// =============================================================================
// Broadcast Messages
// =============================================================================

/// Payload fanned out to every subscriber of a destination.
#[derive(Debug, Clone)]
pub struct TopicMessage {
    /// Destination the message was published to.
    pub topic: Topic,
    /// Hub-wide sequence number.
    pub sequence: u64,
    /// MIME type of the body.
    pub content_type: Arc<str>,
    /// Message body, passed through byte for byte.
    pub body: Arc<[u8]>,
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Configuration for broadcast channel capacities.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity of each per-destination channel.
    pub channel_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1_024,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            channel_capacity: settings.channel_capacity,
        }
    }
}

/// Central hub for all destination channels.
///
/// # Example
///
/// ```rust
/// use live_data_broadcaster::domain::topic::Topic;
/// use live_data_broadcaster::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
/// let topic = Topic::live_data();
///
/// let _rx = hub.subscribe(&topic).unwrap();
/// assert_eq!(hub.receiver_count(&topic), 1);
///
/// let delivered = hub.send(&topic, "text/plain", "hello").unwrap();
/// assert_eq!(delivered, 1);
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    config: BroadcastConfig,
    channels: RwLock<HashMap<Topic, broadcast::Sender<TopicMessage>>>,
    sequence: AtomicU64,
    closed: AtomicBool,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            channels: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Send a payload to every subscriber of `topic`.
    ///
    /// Returns the number of receivers that got the message; zero when
    /// nobody is subscribed. A channel found without receivers is dropped.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::TopicClosed` after `shutdown`.
    pub fn send(
        &self,
        topic: &Topic,
        content_type: &str,
        body: impl AsRef<[u8]>,
    ) -> Result<usize, PublishError> {
        if self.is_closed() {
            return Err(PublishError::TopicClosed(topic.to_string()));
        }

        let delivered = {
            let channels = self.channels.read();
            let Some(tx) = channels.get(topic) else {
                return Ok(0);
            };

            let message = TopicMessage {
                topic: topic.clone(),
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                content_type: Arc::from(content_type),
                body: Arc::from(body.as_ref()),
            };

            // `send` only fails when there are no receivers.
            tx.send(message).unwrap_or(0)
        };

        if delivered == 0 {
            self.release(topic);
        }
        Ok(delivered)
    }

    /// Get a new receiver for `topic`, creating its channel if needed.
    ///
    /// Returns `None` after `shutdown`.
    #[must_use]
    pub fn subscribe(&self, topic: &Topic) -> Option<broadcast::Receiver<TopicMessage>> {
        if self.is_closed() {
            return None;
        }

        if let Some(tx) = self.channels.read().get(topic) {
            return Some(tx.subscribe());
        }

        let mut channels = self.channels.write();
        let tx = channels
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.config.channel_capacity).0);
        Some(tx.subscribe())
    }

    /// Drop the channel for `topic` if it has no receivers left.
    ///
    /// Returns `true` if a channel was removed.
    pub fn release(&self, topic: &Topic) -> bool {
        let mut channels = self.channels.write();
        let idle = channels
            .get(topic)
            .is_some_and(|tx| tx.receiver_count() == 0);
        if idle {
            channels.remove(topic);
        }
        idle
    }

    /// Drop every channel without receivers. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut channels = self.channels.write();
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }

    /// Get the number of active receivers for `topic`.
    #[must_use]
    pub fn receiver_count(&self, topic: &Topic) -> usize {
        self.channels
            .read()
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Close every channel. Receivers observe `RecvError::Closed` once
    /// buffered messages are drained, and later publishes fail.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels.write().clear();
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get statistics about all channels.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        let channels = self.channels.read();
        BroadcastStats {
            topics: channels.len(),
            total_receivers: channels.values().map(broadcast::Sender::receiver_count).sum(),
        }
    }
}

#[async_trait]
impl LiveDataPublisher for BroadcastHub {
    async fn publish(
        &self,
        topic: &Topic,
        message: &LiveDataMessage,
    ) -> Result<usize, PublishError> {
        let body = serde_json::to_vec(message)?;
        self.send(topic, JSON_CONTENT_TYPE, body)
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about broadcast channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastStats {
    /// Number of destinations with a channel.
    pub topics: usize,
    /// Receivers across all channels.
    pub total_receivers: usize,
}

// =============================================================================
// Tests
// =============================================================================
