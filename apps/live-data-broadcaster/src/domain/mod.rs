//! Domain Layer - Core live data types and business rules.
//!
//! This layer contains the types that describe what gets published:
//! the sample record, its admissible range, and the topic it is addressed
//! to. Nothing here knows about timers, sockets, or STOMP.

/// Live data samples and their bounds.
pub mod live_data;

/// Topic (STOMP destination) addressing.
pub mod topic;

/// Subscription bookkeeping for broker sessions.
pub mod subscription;

/// Domain validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    /// Sample range bounds are not finite or not ordered.
    #[error("invalid sample range [{min}, {max}): bounds must be finite and min < max")]
    InvalidRange {
        /// Lower bound (inclusive).
        min: f64,
        /// Upper bound (exclusive).
        max: f64,
    },

    /// Topic destination is malformed.
    #[error("invalid topic '{0}': {1}")]
    InvalidTopic(String, &'static str),
}
