//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SampleSource`: Bounded random values
//! - `Clock`: Current instant for timestamps
//! - `LiveDataPublisher`: Hands a message to the topic transport

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::live_data::LiveDataMessage;
use crate::domain::topic::Topic;

/// Source of bounded numeric samples.
#[cfg_attr(test, mockall::automock)]
pub trait SampleSource: Send + Sync {
    /// Draw the next sample.
    fn next_sample(&self) -> f64;
}

/// Source of the current instant.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Errors surfaced by a publisher.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Message could not be serialized for the wire.
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transport has been shut down.
    #[error("topic {0} is closed")]
    TopicClosed(String),
}

/// Delivers live data messages to a topic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveDataPublisher: Send + Sync {
    /// Publish one message.
    ///
    /// Returns the number of subscribers the message reached. Zero
    /// subscribers is not an error.
    async fn publish(&self, topic: &Topic, message: &LiveDataMessage)
    -> Result<usize, PublishError>;
}
