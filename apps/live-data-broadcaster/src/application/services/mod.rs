//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `LiveDataService`: Samples, stamps, and publishes one message per tick

/// Scheduled live data publishing.
pub mod live_data;

pub use live_data::{LiveDataService, LiveDataServiceConfig, PublisherSnapshot, PublisherState};
