//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Publishing**: Samples published, deliveries, errors, last value
//! - **Sessions**: Active STOMP sessions and subscriptions
//! - **Protocol**: Inbound frames by command, protocol errors
//! - **Latency**: Tick duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::stomp::Command;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first.
///
/// # Panics
///
/// Panics if another global recorder was installed first.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Publishing
    describe_counter!(
        "live_data_samples_published_total",
        "Total samples handed to the broker"
    );
    describe_counter!(
        "live_data_deliveries_total",
        "Total sample deliveries across all subscribers"
    );
    describe_counter!(
        "live_data_publish_errors_total",
        "Total failed publishes"
    );
    describe_gauge!("live_data_last_value", "Most recently published sample");
    describe_histogram!(
        "live_data_tick_duration_seconds",
        "Time to sample and publish one tick"
    );

    // Sessions
    describe_gauge!("live_data_stomp_sessions", "Active STOMP sessions");
    describe_gauge!(
        "live_data_subscriptions",
        "Active STOMP subscriptions across all sessions"
    );

    // Protocol
    describe_counter!(
        "live_data_frames_received_total",
        "Inbound STOMP frames by command"
    );
    describe_counter!(
        "live_data_protocol_errors_total",
        "STOMP protocol errors by kind"
    );
    describe_counter!(
        "live_data_messages_dropped_total",
        "Messages skipped by lagging subscribers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one published sample and how many subscribers received it.
pub fn record_sample_published(value: f64, delivered: u64) {
    counter!("live_data_samples_published_total").increment(1);
    counter!("live_data_deliveries_total").increment(delivered);
    gauge!("live_data_last_value").set(value);
}

/// Record a failed publish.
pub fn record_publish_error() {
    counter!("live_data_publish_errors_total").increment(1);
}

/// Record the time taken by one tick.
pub fn record_tick_duration(duration: Duration) {
    histogram!("live_data_tick_duration_seconds").record(duration.as_secs_f64());
}

/// Update the active STOMP session count.
#[allow(clippy::cast_precision_loss)]
pub fn set_stomp_sessions(count: usize) {
    gauge!("live_data_stomp_sessions").set(count as f64);
}

/// Update the active subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("live_data_subscriptions").set(count as f64);
}

/// Record an inbound frame.
pub fn record_frame_received(command: Command) {
    counter!(
        "live_data_frames_received_total",
        "command" => command.as_str()
    )
    .increment(1);
}

/// Record a protocol error.
pub fn record_protocol_error(kind: &'static str) {
    counter!(
        "live_data_protocol_errors_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record messages a lagging subscriber skipped.
pub fn record_messages_dropped(count: u64) {
    counter!("live_data_messages_dropped_total").increment(count);
}

// =============================================================================
// Tests
// =============================================================================
