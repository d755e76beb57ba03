//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, publisher status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (ready after the first tick)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{PublisherSnapshot, PublisherState};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::stomp::StompServerState;

/// Ticks that may be missed before the publisher counts as stalled.
const STALE_TICKS: u32 = 3;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Publisher status.
    pub publisher: PublisherStatus,
    /// STOMP session status.
    pub sessions: SessionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Publishing on schedule.
    Healthy,
    /// Ticking, but recent publishes failed.
    Degraded,
    /// No tick yet, or the timer has stalled.
    Unhealthy,
}

/// Publisher status.
#[derive(Debug, Clone, Serialize)]
pub struct PublisherStatus {
    /// Destination samples are published to.
    pub topic: String,
    /// Publish period in milliseconds.
    pub interval_ms: u64,
    /// Milliseconds since the last tick.
    pub ms_since_last_tick: Option<u64>,
    /// Publishing counters.
    #[serde(flatten)]
    pub counters: PublisherSnapshot,
}

/// STOMP session status.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Open WebSocket connections.
    pub active: usize,
    /// Subscriptions across all sessions.
    pub subscriptions: usize,
    /// Broadcast receivers across all destinations.
    pub broadcast_receivers: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    topic: String,
    interval: Duration,
    publisher: Arc<PublisherState>,
    stomp: Arc<StompServerState>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        topic: String,
        interval: Duration,
        publisher: Arc<PublisherState>,
        stomp: Arc<StompServerState>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            topic,
            interval,
            publisher,
            stomp,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the router with all health routes.
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.publisher.ticks() > 0 {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let counters = state.publisher.snapshot();
    let since_last_tick = state.publisher.since_last_tick();
    let status = determine_health_status(
        since_last_tick,
        counters.consecutive_failures,
        state.interval,
    );

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        publisher: PublisherStatus {
            topic: state.topic.clone(),
            interval_ms: millis(state.interval),
            ms_since_last_tick: since_last_tick.map(millis),
            counters,
        },
        sessions: SessionStatus {
            active: state.stomp.active_sessions(),
            subscriptions: state.stomp.registry().stats().subscription_count,
            broadcast_receivers: state.stomp.hub().stats().total_receivers,
        },
    }
}

fn determine_health_status(
    since_last_tick: Option<Duration>,
    consecutive_failures: u64,
    interval: Duration,
) -> HealthStatus {
    match since_last_tick {
        None => HealthStatus::Unhealthy,
        Some(elapsed) if elapsed > interval * STALE_TICKS => HealthStatus::Unhealthy,
        Some(_) if consecutive_failures > 0 => HealthStatus::Degraded,
        Some(_) => HealthStatus::Healthy,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
