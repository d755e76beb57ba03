//! Broadcaster Configuration Settings
//!
//! Configuration types for the broadcaster, loaded from environment variables.
//! Unparseable numbers fall back to their defaults; values that parse but make
//! no sense together are rejected.

use std::time::Duration;

use crate::domain::live_data::{DEFAULT_MAX, DEFAULT_MIN, SampleRange};
use crate::domain::topic::{LIVE_DATA_DESTINATION, Topic};

/// Publishing schedule and sample settings.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    /// Publish period.
    pub interval: Duration,
    /// Destination samples are published to.
    pub topic: Topic,
    /// Range samples are drawn from.
    pub range: SampleRange,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1_000),
            topic: Topic::live_data(),
            range: SampleRange::default(),
        }
    }
}

/// STOMP protocol settings.
#[derive(Debug, Clone)]
pub struct StompSettings {
    /// Heart-beat period the server offers to send.
    pub heartbeat_send: Duration,
    /// Heart-beat period the server wants to receive.
    pub heartbeat_recv: Duration,
    /// Destination prefixes served by the in-process broker.
    pub broker_prefixes: Vec<String>,
    /// Largest inbound frame accepted.
    pub max_frame_bytes: usize,
    /// Largest inbound WebSocket message accepted. One message may carry
    /// several frames, so this is at least `max_frame_bytes`.
    pub max_message_bytes: usize,
    /// Outbound frames queued per connection before forwarders wait.
    pub outbound_buffer: usize,
}

impl Default for StompSettings {
    fn default() -> Self {
        Self {
            heartbeat_send: Duration::from_millis(10_000),
            heartbeat_recv: Duration::from_millis(10_000),
            broker_prefixes: vec!["/topic/".to_string()],
            max_frame_bytes: 64 * 1_024,
            max_message_bytes: 1_024 * 1_024,
            outbound_buffer: 256,
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// Capacity of each per-destination broadcast channel.
    pub channel_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 1_024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// STOMP/WebSocket port.
    pub ws_port: u16,
    /// WebSocket endpoint path.
    pub ws_path: String,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8080,
            ws_path: "/ws".to_string(),
            health_port: 8082,
        }
    }
}

/// Complete broadcaster configuration.
#[derive(Debug, Clone, Default)]
pub struct BroadcasterConfig {
    /// Publishing settings.
    pub publisher: PublisherSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// STOMP protocol settings.
    pub stomp: StompSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
}

impl BroadcasterConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value parses but is out of range or does not
    /// fit with the other settings.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`BroadcasterConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let interval = env.duration_millis("LIVE_DATA_INTERVAL_MS", defaults.publisher.interval);
        if interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "LIVE_DATA_INTERVAL_MS",
                reason: "must be greater than zero".to_string(),
            });
        }

        let topic = env
            .string("LIVE_DATA_TOPIC")
            .unwrap_or_else(|| LIVE_DATA_DESTINATION.to_string());
        let topic = Topic::parse(&topic).map_err(|e| ConfigError::InvalidValue {
            key: "LIVE_DATA_TOPIC",
            reason: e.to_string(),
        })?;

        let range = SampleRange::new(
            env.f64("LIVE_DATA_MIN", DEFAULT_MIN),
            env.f64("LIVE_DATA_MAX", DEFAULT_MAX),
        )
        .map_err(|e| ConfigError::InvalidValue {
            key: "LIVE_DATA_MIN",
            reason: e.to_string(),
        })?;

        let server = ServerSettings {
            ws_port: env.u16("LIVE_DATA_WS_PORT", defaults.server.ws_port),
            ws_path: env
                .string("LIVE_DATA_WS_PATH")
                .unwrap_or(defaults.server.ws_path),
            health_port: env.u16("LIVE_DATA_HEALTH_PORT", defaults.server.health_port),
        };
        if !server.ws_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "LIVE_DATA_WS_PATH",
                reason: format!("'{}' must start with '/'", server.ws_path),
            });
        }

        let broker_prefixes = env.string("LIVE_DATA_BROKER_PREFIXES").map_or(
            defaults.stomp.broker_prefixes,
            |raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(ToString::to_string)
                    .collect()
            },
        );
        if broker_prefixes.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "LIVE_DATA_BROKER_PREFIXES",
                reason: "at least one prefix is required".to_string(),
            });
        }
        if !broker_prefixes.iter().any(|p| topic.has_prefix(p)) {
            return Err(ConfigError::InvalidValue {
                key: "LIVE_DATA_TOPIC",
                reason: format!("'{topic}' is not under a broker prefix {broker_prefixes:?}"),
            });
        }

        let stomp = StompSettings {
            heartbeat_send: env.duration_millis(
                "LIVE_DATA_HEARTBEAT_SEND_MS",
                defaults.stomp.heartbeat_send,
            ),
            heartbeat_recv: env.duration_millis(
                "LIVE_DATA_HEARTBEAT_RECV_MS",
                defaults.stomp.heartbeat_recv,
            ),
            broker_prefixes,
            max_frame_bytes: env.positive_usize(
                "LIVE_DATA_MAX_FRAME_BYTES",
                defaults.stomp.max_frame_bytes,
            )?,
            max_message_bytes: env.positive_usize(
                "LIVE_DATA_MAX_MESSAGE_BYTES",
                defaults.stomp.max_message_bytes,
            )?,
            outbound_buffer: env.positive_usize(
                "LIVE_DATA_OUTBOUND_BUFFER",
                defaults.stomp.outbound_buffer,
            )?,
        };

        if stomp.max_message_bytes < stomp.max_frame_bytes {
            return Err(ConfigError::InvalidValue {
                key: "LIVE_DATA_MAX_MESSAGE_BYTES",
                reason: format!(
                    "{} is smaller than LIVE_DATA_MAX_FRAME_BYTES ({})",
                    stomp.max_message_bytes, stomp.max_frame_bytes
                ),
            });
        }

        let broadcast = BroadcastSettings {
            channel_capacity: env.positive_usize(
                "LIVE_DATA_CHANNEL_CAPACITY",
                defaults.broadcast.channel_capacity,
            )?,
        };

        Ok(Self {
            publisher: PublisherSettings {
                interval,
                topic,
                range,
            },
            server,
            stomp,
            broadcast,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable parsed but holds an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Offending variable.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Typed access to a key lookup.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.string(key).and_then(|v| v.trim().parse().ok())
    }

    fn u16(&self, key: &str, default: u16) -> u16 {
        self.parse(key).unwrap_or(default)
    }

    fn f64(&self, key: &str, default: f64) -> f64 {
        self.parse(key).unwrap_or(default)
    }

    fn positive_usize(&self, key: &'static str, default: usize) -> Result<usize, ConfigError> {
        match self.parse::<usize>(key).unwrap_or(default) {
            0 => Err(ConfigError::InvalidValue {
                key,
                reason: "must be greater than zero".to_string(),
            }),
            n => Ok(n),
        }
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key).map_or(default, Duration::from_millis)
    }
}
