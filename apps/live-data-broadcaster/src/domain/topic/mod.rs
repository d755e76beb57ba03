//! Topic Addressing
//!
//! A `Topic` is a validated STOMP destination such as `/topic/live-data`.

use std::fmt;
use std::sync::Arc;

use super::DomainError;

/// Destination the live data samples are published to.
pub const LIVE_DATA_DESTINATION: &str = "/topic/live-data";

/// Validated STOMP destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(Arc<str>);

impl Topic {
    /// Parse a destination string.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidTopic` if the destination is empty, does
    /// not start with `/`, or contains whitespace, NUL, or `:`.
    pub fn parse(destination: &str) -> Result<Self, DomainError> {
        if destination.is_empty() {
            return Err(DomainError::InvalidTopic(
                destination.to_string(),
                "must not be empty",
            ));
        }
        if !destination.starts_with('/') {
            return Err(DomainError::InvalidTopic(
                destination.to_string(),
                "must start with '/'",
            ));
        }
        if destination
            .chars()
            .any(|c| c.is_whitespace() || c == '\0' || c == ':')
        {
            return Err(DomainError::InvalidTopic(
                destination.to_string(),
                "must not contain whitespace, NUL, or ':'",
            ));
        }
        Ok(Self(Arc::from(destination)))
    }

    /// The live data topic.
    #[must_use]
    pub fn live_data() -> Self {
        Self(Arc::from(LIVE_DATA_DESTINATION))
    }

    /// Full destination string.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.0
    }

    /// Last path segment (`live-data` for `/topic/live-data`).
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Whether this topic falls under the given broker prefix.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
