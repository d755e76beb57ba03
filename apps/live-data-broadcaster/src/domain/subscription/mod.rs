//! Subscription Tracking
//!
//! Domain types for tracking which broker sessions are subscribed to which
//! destinations.
//!
//! # Design
//!
//! The registry tracks:
//! - The subscriptions each session holds, keyed by the client-chosen id
//! - Reference counts per destination across all sessions
//!
//! The broker uses it to reject duplicate subscription ids and to release
//! everything a session held when its connection closes.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::topic::Topic;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a broker session.
pub type SessionId = String;

/// Client-chosen subscription identifier, unique within a session.
pub type SubscriptionId = String;

/// Subscription registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The session already has a subscription with this id.
    #[error("subscription id '{0}' is already in use")]
    DuplicateId(SubscriptionId),
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    /// Map from session to its subscriptions.
    sessions: HashMap<SessionId, HashMap<SubscriptionId, Topic>>,
    /// Map from destination to reference count.
    destination_refcount: HashMap<Topic, usize>,
}

impl RegistryState {
    fn release(&mut self, topic: &Topic) {
        if let Some(refcount) = self.destination_refcount.get_mut(topic) {
            *refcount = refcount.saturating_sub(1);
            if *refcount == 0 {
                self.destination_refcount.remove(topic);
            }
        }
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of subscriptions across all sessions.
///
/// # Example
///
/// ```rust
/// use live_data_broadcaster::domain::subscription::SubscriptionRegistry;
/// use live_data_broadcaster::domain::topic::Topic;
///
/// let registry = SubscriptionRegistry::new();
/// let topic = Topic::live_data();
///
/// registry.add("session-1", "sub-0", topic.clone()).unwrap();
/// registry.add("session-2", "sub-0", topic.clone()).unwrap();
/// assert_eq!(registry.subscriber_count(&topic), 2);
///
/// let released = registry.session_closed("session-1");
/// assert_eq!(released, vec![topic.clone()]);
/// assert_eq!(registry.subscriber_count(&topic), 1);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::DuplicateId` if the session already holds
    /// a subscription with the same id.
    pub fn add(
        &self,
        session: &str,
        id: &str,
        topic: Topic,
    ) -> Result<(), SubscriptionError> {
        let mut state = self.state.write();
        let subscriptions = state.sessions.entry(session.to_string()).or_default();

        if subscriptions.contains_key(id) {
            return Err(SubscriptionError::DuplicateId(id.to_string()));
        }
        subscriptions.insert(id.to_string(), topic.clone());
        *state.destination_refcount.entry(topic).or_insert(0) += 1;
        Ok(())
    }

    /// Remove a subscription, returning its destination if it existed.
    pub fn remove(&self, session: &str, id: &str) -> Option<Topic> {
        let mut state = self.state.write();
        let subscriptions = state.sessions.get_mut(session)?;
        let topic = subscriptions.remove(id)?;

        if subscriptions.is_empty() {
            state.sessions.remove(session);
        }
        state.release(&topic);
        Some(topic)
    }

    /// Remove every subscription held by a session.
    ///
    /// Returns the destinations that were released.
    pub fn session_closed(&self, session: &str) -> Vec<Topic> {
        let mut state = self.state.write();
        let Some(subscriptions) = state.sessions.remove(session) else {
            return vec![];
        };

        let released: Vec<Topic> = subscriptions.into_values().collect();
        for topic in &released {
            state.release(topic);
        }
        released
    }

    /// Number of subscriptions to a destination across all sessions.
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.state
            .read()
            .destination_refcount
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    /// Subscriptions held by one session.
    #[must_use]
    pub fn session_subscriptions(&self, session: &str) -> Vec<(SubscriptionId, Topic)> {
        self.state
            .read()
            .sessions
            .get(session)
            .map(|subs| {
                subs.iter()
                    .map(|(id, topic)| (id.clone(), topic.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get overall statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            destination_count: state.destination_refcount.len(),
            session_count: state.sessions.len(),
            subscription_count: state.destination_refcount.values().sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Subscription statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of distinct destinations with at least one subscriber.
    pub destination_count: usize,
    /// Number of sessions holding at least one subscription.
    pub session_count: usize,
    /// Total subscriptions.
    pub subscription_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
