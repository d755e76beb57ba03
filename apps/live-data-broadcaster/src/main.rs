//! Live Data Broadcaster Binary
//!
//! Starts the scheduled publisher, the STOMP-over-WebSocket broker, and the
//! health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin live-data-broadcaster
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//! - `LIVE_DATA_INTERVAL_MS`: Publish period (default: 1000)
//! - `LIVE_DATA_TOPIC`: Destination (default: /topic/live-data)
//! - `LIVE_DATA_MIN` / `LIVE_DATA_MAX`: Sample bounds (default: 90 / 100)
//! - `LIVE_DATA_WS_PORT`: STOMP/WebSocket port (default: 8080)
//! - `LIVE_DATA_WS_PATH`: WebSocket path (default: /ws)
//! - `LIVE_DATA_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `LIVE_DATA_HEARTBEAT_SEND_MS` / `LIVE_DATA_HEARTBEAT_RECV_MS`: Server heart-beat (default: 10000)
//! - `LIVE_DATA_BROKER_PREFIXES`: Broker destination prefixes (default: /topic/)
//! - `LIVE_DATA_MAX_FRAME_BYTES`: Largest inbound frame (default: 65536)
//! - `LIVE_DATA_MAX_MESSAGE_BYTES`: Largest inbound WebSocket message (default: 1048576)
//! - `LIVE_DATA_OUTBOUND_BUFFER`: Queued frames per connection (default: 256)
//! - `LIVE_DATA_CHANNEL_CAPACITY`: Broadcast buffer per topic (default: 1024)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: live-data-broadcaster)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use live_data_broadcaster::infrastructure::health::{HealthServer, HealthServerState};
use live_data_broadcaster::infrastructure::stomp::{
    StompServer, StompServerConfig, StompServerState,
};
use live_data_broadcaster::{
    BroadcastConfig, BroadcastHub, BroadcasterConfig, LiveDataService, LiveDataServiceConfig,
    RandomSampleSource, SubscriptionRegistry, SystemClock, init_metrics, init_telemetry,
};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = init_telemetry().context("failed to initialize telemetry")?;

    tracing::info!("Starting Live Data Broadcaster");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = BroadcasterConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(config.broadcast)));
    let registry = Arc::new(SubscriptionRegistry::new());

    // Publisher
    let source = RandomSampleSource::new(config.publisher.range)
        .context("sample range cannot back a uniform distribution")?;
    let service = Arc::new(LiveDataService::new(
        LiveDataServiceConfig {
            topic: config.publisher.topic.clone(),
            interval: config.publisher.interval,
        },
        Arc::new(source),
        Arc::new(SystemClock),
        Arc::clone(&broadcast_hub) as _,
    ));

    // STOMP broker
    let stomp_state = Arc::new(StompServerState::new(
        StompServerConfig::from_settings(&config.server, &config.stomp),
        Arc::clone(&broadcast_hub),
        Arc::clone(&registry),
        shutdown_token.clone(),
    ));
    let stomp_server = StompServer::new(config.server.ws_port, Arc::clone(&stomp_state));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        config.publisher.topic.to_string(),
        config.publisher.interval,
        service.state(),
        Arc::clone(&stomp_state),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let stomp_shutdown = shutdown_token.clone();
    let stomp_task = tokio::spawn(async move {
        if let Err(e) = stomp_server.run().await {
            tracing::error!(error = %e, "STOMP server error");
            stomp_shutdown.cancel();
        }
    });

    let publisher_service = Arc::clone(&service);
    let publisher_cancel = shutdown_token.clone();
    let publisher_task = tokio::spawn(async move {
        publisher_service.run(publisher_cancel).await;
    });

    tracing::info!("Live data broadcaster ready");

    await_shutdown(shutdown_token).await;

    drain(vec![publisher_task, stomp_task, health_task]).await;
    broadcast_hub.shutdown();

    tracing::info!(
        ticks = service.state().ticks(),
        deliveries = service.state().deliveries(),
        "Live data broadcaster stopped"
    );
    Ok(())
}

/// Wait for spawned tasks to finish, up to `SHUTDOWN_TIMEOUT`.
async fn drain(tasks: Vec<JoinHandle<()>>) {
    let all = futures::future::join_all(tasks);
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, all).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out, exiting with tasks still running"
        );
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &BroadcasterConfig) {
    tracing::info!(
        topic = %config.publisher.topic,
        interval_ms = ?config.publisher.interval.as_millis(),
        min = config.publisher.range.min(),
        max = config.publisher.range.max(),
        ws_port = config.server.ws_port,
        ws_path = %config.server.ws_path,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_send_ms = ?config.stomp.heartbeat_send.as_millis(),
        heartbeat_recv_ms = ?config.stomp.heartbeat_recv.as_millis(),
        broker_prefixes = ?config.stomp.broker_prefixes,
        max_frame_bytes = config.stomp.max_frame_bytes,
        max_message_bytes = config.stomp.max_message_bytes,
        channel_capacity = config.broadcast.channel_capacity,
        "STOMP settings"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), or for a fatal server
/// error to cancel the token.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Server failure, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
