//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the servers that expose them.

/// Broadcast channel adapters for message distribution.
pub mod broadcast;

/// Wall-clock adapter.
pub mod clock;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Random sample source.
pub mod sampling;

/// STOMP-over-WebSocket broker.
pub mod stomp;

/// OpenTelemetry tracing integration.
pub mod telemetry;
