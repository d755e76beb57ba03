#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! Live Data Broadcaster - Scheduled STOMP Publisher
//!
//! Once per interval, draws a bounded random sample, stamps it with the
//! current time, and publishes it as JSON to a STOMP topic. Browsers
//! subscribe over WebSocket.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure data types
//!   - `live_data`: The published sample and its range
//!   - `topic`: Validated STOMP destinations
//!   - `subscription`: Which sessions subscribe to which destinations
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Sample source, clock, and publisher interfaces
//!   - `services`: The scheduled publisher
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `sampling`, `clock`: Port implementations
//!   - `broadcast`: Per-destination fan-out channels
//!   - `stomp`: STOMP-over-WebSocket broker
//!   - `config`, `health`, `metrics`, `telemetry`: Operations
//!
//! # Data Flow
//!
//! ```text
//! interval ──► LiveDataService ──► BroadcastHub ──► STOMP session ──► browser 1
//!                                       │       └─► STOMP session ──► browser 2
//!                                       └─────────► STOMP session ──► browser N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::DomainError;
pub use domain::live_data::{LiveDataMessage, SampleRange};
pub use domain::subscription::{SubscriptionRegistry, SubscriptionStats};
pub use domain::topic::Topic;

// Application
pub use application::ports::{Clock, LiveDataPublisher, PublishError, SampleSource};
pub use application::services::{LiveDataService, LiveDataServiceConfig, PublisherState};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, BroadcasterConfig, ConfigError, PublisherSettings, ServerSettings,
    StompSettings,
};

// Adapters
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, SharedBroadcastHub, TopicMessage,
};
pub use infrastructure::clock::SystemClock;
pub use infrastructure::sampling::RandomSampleSource;

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::stomp::{
    StompServer, StompServerConfig, StompServerError, StompServerState,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
