//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the publishing service and the port interfaces
//! that define how it reaches the random source, the clock, and the
//! message transport.

/// Port interfaces for external systems (randomness, time, transport).
pub mod ports;

/// Application services for scheduled publishing.
pub mod services;
