//! Live Data Service
//!
//! On every tick of a fixed-rate timer: draw one bounded sample, stamp it
//! with the current instant, and hand it to the publisher for the
//! configured topic.
//!
//! Publish failures are logged and counted; they never stop the timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Clock, LiveDataPublisher, PublishError, SampleSource};
use crate::domain::live_data::LiveDataMessage;
use crate::domain::topic::Topic;
use crate::infrastructure::metrics;

/// Default publish period.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the live data service.
#[derive(Debug, Clone)]
pub struct LiveDataServiceConfig {
    /// Destination samples are published to.
    pub topic: Topic,
    /// Publish period.
    pub interval: Duration,
}

impl Default for LiveDataServiceConfig {
    fn default() -> Self {
        Self {
            topic: Topic::live_data(),
            interval: DEFAULT_INTERVAL,
        }
    }
}

// =============================================================================
// Publisher State
// =============================================================================

/// Counters describing publishing activity, shared with the health endpoint.
#[derive(Debug, Default)]
pub struct PublisherState {
    ticks: AtomicU64,
    deliveries: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
    last_value_bits: AtomicU64,
    last_published_at: RwLock<Option<DateTime<Utc>>>,
    last_tick_at: RwLock<Option<Instant>>,
    last_error: RwLock<Option<String>>,
}

impl PublisherState {
    /// Create empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record_success(&self, message: &LiveDataMessage, delivered: usize) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_value_bits
            .store(message.value.to_bits(), Ordering::Relaxed);
        *self.last_published_at.write() = Some(message.timestamp);
        *self.last_tick_at.write() = Some(Instant::now());
        *self.last_error.write() = None;
    }

    fn record_failure(&self, error: &PublishError) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_tick_at.write() = Some(Instant::now());
        *self.last_error.write() = Some(error.to_string());
    }

    /// Total ticks fired.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Total subscriber deliveries across all ticks.
    #[must_use]
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Total failed publishes.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Time since the last tick, if any tick has fired.
    #[must_use]
    pub fn since_last_tick(&self) -> Option<Duration> {
        self.last_tick_at.read().map(|at| at.elapsed())
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> PublisherSnapshot {
        let ticks = self.ticks();
        let failures = self.failures();
        PublisherSnapshot {
            ticks,
            deliveries: self.deliveries(),
            failures,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_value: (ticks > failures)
                .then(|| f64::from_bits(self.last_value_bits.load(Ordering::Relaxed))),
            last_published_at: *self.last_published_at.read(),
            last_error: self.last_error.read().clone(),
        }
    }
}

/// Serializable view of `PublisherState`.
#[derive(Debug, Clone, Serialize)]
pub struct PublisherSnapshot {
    /// Total ticks fired.
    pub ticks: u64,
    /// Total subscriber deliveries.
    pub deliveries: u64,
    /// Total failed publishes.
    pub failures: u64,
    /// Failed publishes since the last success.
    pub consecutive_failures: u64,
    /// Most recently published value.
    pub last_value: Option<f64>,
    /// Timestamp of the most recently published message.
    pub last_published_at: Option<DateTime<Utc>>,
    /// Error from the most recent tick, if it failed.
    pub last_error: Option<String>,
}

// =============================================================================
// Service
// =============================================================================

/// Scheduled publisher of live data samples.
pub struct LiveDataService {
    config: LiveDataServiceConfig,
    source: Arc<dyn SampleSource>,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn LiveDataPublisher>,
    state: Arc<PublisherState>,
}

impl LiveDataService {
    /// Create a new service.
    #[must_use]
    pub fn new(
        config: LiveDataServiceConfig,
        source: Arc<dyn SampleSource>,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn LiveDataPublisher>,
    ) -> Self {
        Self {
            config,
            source,
            clock,
            publisher,
            state: Arc::new(PublisherState::new()),
        }
    }

    /// Shared publishing counters.
    #[must_use]
    pub fn state(&self) -> Arc<PublisherState> {
        Arc::clone(&self.state)
    }

    /// Service configuration.
    #[must_use]
    pub const fn config(&self) -> &LiveDataServiceConfig {
        &self.config
    }

    /// Produce and publish one message.
    ///
    /// # Errors
    ///
    /// Returns the publisher's error if the hand-off failed. The failure is
    /// also recorded in `PublisherState`.
    pub async fn tick(&self) -> Result<LiveDataMessage, PublishError> {
        let started = Instant::now();
        let message = LiveDataMessage::new(self.source.next_sample(), self.clock.now());

        let result = self.publisher.publish(&self.config.topic, &message).await;
        metrics::record_tick_duration(started.elapsed());

        match result {
            Ok(delivered) => {
                self.state.record_success(&message, delivered);
                metrics::record_sample_published(message.value, delivered as u64);
                tracing::trace!(
                    topic = %self.config.topic,
                    value = message.value,
                    delivered,
                    "Live data published"
                );
                Ok(message)
            }
            Err(e) => {
                self.state.record_failure(&e);
                metrics::record_publish_error();
                tracing::warn!(topic = %self.config.topic, error = %e, "Live data publish failed");
                Err(e)
            }
        }
    }

    /// Run the fixed-rate timer until cancelled.
    ///
    /// The first tick fires immediately. Ticks missed while the runtime was
    /// stalled are skipped rather than replayed.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            topic = %self.config.topic,
            interval_ms = self.config.interval.as_millis(),
            "Live data publisher started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!("Live data publisher cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let _ = self.tick().await;
                }
            }
        }

        tracing::info!(ticks = self.state.ticks(), "Live data publisher stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::application::ports::{MockClock, MockLiveDataPublisher, MockSampleSource};

    /// Publisher that counts calls and optionally fails.
    #[derive(Default)]
    struct CountingPublisher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LiveDataPublisher for CountingPublisher {
        async fn publish(
            &self,
            topic: &Topic,
            _message: &LiveDataMessage,
        ) -> Result<usize, PublishError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PublishError::TopicClosed(topic.to_string()))
            } else {
                Ok(2)
            }
        }
    }

    struct FixedSource(f64);

    impl SampleSource for FixedSource {
        fn next_sample(&self) -> f64 {
            self.0
        }
    }

    struct FixedClock;

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
        }
    }

    fn service_with(publisher: Arc<dyn LiveDataPublisher>) -> LiveDataService {
        LiveDataService::new(
            LiveDataServiceConfig::default(),
            Arc::new(FixedSource(94.0)),
            Arc::new(FixedClock),
            publisher,
        )
    }

    #[tokio::test]
    async fn tick_publishes_exactly_once_with_sample_and_timestamp() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap();

        let mut source = MockSampleSource::new();
        source.expect_next_sample().times(1).return_const(97.25);

        let mut clock = MockClock::new();
        clock.expect_now().times(1).return_const(ts);

        let mut publisher = MockLiveDataPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .withf(move |topic, message| {
                topic.destination() == "/topic/live-data"
                    && message.value == 97.25
                    && message.timestamp == ts
            })
            .returning(|_, _| Ok(3));

        let service = LiveDataService::new(
            LiveDataServiceConfig::default(),
            Arc::new(source),
            Arc::new(clock),
            Arc::new(publisher),
        );

        let message = service.tick().await.unwrap();
        assert_eq!(message, LiveDataMessage::new(97.25, ts));

        let snapshot = service.state().snapshot();
        assert_eq!(snapshot.ticks, 1);
        assert_eq!(snapshot.deliveries, 3);
        assert_eq!(snapshot.failures, 0);
        assert_eq!(snapshot.last_value, Some(97.25));
        assert_eq!(snapshot.last_published_at, Some(ts));
    }

    #[tokio::test]
    async fn tick_with_no_subscribers_is_not_an_error() {
        let mut publisher = MockLiveDataPublisher::new();
        publisher.expect_publish().times(1).returning(|_, _| Ok(0));

        let service = service_with(Arc::new(publisher));
        assert!(service.tick().await.is_ok());
        assert_eq!(service.state().deliveries(), 0);
    }

    #[tokio::test]
    async fn failed_tick_is_recorded() {
        let publisher = Arc::new(CountingPublisher {
            fail: true,
            ..CountingPublisher::default()
        });
        let service = service_with(publisher);

        let err = service.tick().await.unwrap_err();
        assert!(matches!(err, PublishError::TopicClosed(_)));

        let snapshot = service.state().snapshot();
        assert_eq!(snapshot.ticks, 1);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.consecutive_failures, 1);
        assert_eq!(snapshot.last_value, None);
        assert!(snapshot.last_error.unwrap().contains("/topic/live-data"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_publishes_once_per_interval() {
        let publisher = Arc::new(CountingPublisher::default());
        let service = Arc::new(service_with(Arc::clone(&publisher) as Arc<dyn LiveDataPublisher>));
        let cancel = CancellationToken::new();

        let handle = {
            let service = Arc::clone(&service);
            let cancel = cancel.clone();
            tokio::spawn(async move { service.run(cancel).await })
        };

        // Ticks at 0s, 1s, 2s, 3s.
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(publisher.calls.load(Ordering::SeqCst), 4);
        assert_eq!(service.state().ticks(), 4);
        assert_eq!(service.state().deliveries(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn run_keeps_ticking_after_failures() {
        let publisher = Arc::new(CountingPublisher {
            fail: true,
            ..CountingPublisher::default()
        });
        let service = Arc::new(service_with(Arc::clone(&publisher) as Arc<dyn LiveDataPublisher>));
        let cancel = CancellationToken::new();

        let handle = {
            let service = Arc::clone(&service);
            let cancel = cancel.clone();
            tokio::spawn(async move { service.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(publisher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(service.state().failures(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_when_cancelled_before_start() {
        let publisher = Arc::new(CountingPublisher::default());
        let service = service_with(Arc::clone(&publisher) as Arc<dyn LiveDataPublisher>);
        let cancel = CancellationToken::new();
        cancel.cancel();

        service.run(cancel).await;

        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn default_config_publishes_live_data_every_second() {
        let config = LiveDataServiceConfig::default();
        assert_eq!(config.topic, Topic::live_data());
        assert_eq!(config.interval, Duration::from_secs(1));
    }
}
