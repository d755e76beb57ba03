//! STOMP Session
//!
//! Protocol state machine for one connection. It consumes decoded frames
//! and returns the actions the connection task must carry out; it performs
//! no I/O itself.
//!
//! # States
//!
//! ```text
//! AwaitingConnect ──CONNECT/STOMP──► Connected ──DISCONNECT/error──► Closed
//! ```

use std::sync::Arc;

use super::frame::{Command, Escaping, Frame, FrameError};
use super::heartbeat::{HeartBeat, Negotiated, negotiate};
use crate::domain::subscription::{SessionId, SubscriptionError, SubscriptionId, SubscriptionRegistry};
use crate::domain::topic::Topic;
use crate::infrastructure::broadcast::TopicMessage;
use crate::infrastructure::metrics;

/// Value of the `server` header in `CONNECTED` frames.
pub const SERVER_NAME: &str = concat!("live-data-broadcaster/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Versions
// =============================================================================

/// Supported protocol versions, ordered oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StompVersion {
    /// STOMP 1.0
    V1_0,
    /// STOMP 1.1
    V1_1,
    /// STOMP 1.2
    V1_2,
}

impl StompVersion {
    /// Versions advertised in `ERROR` frames when negotiation fails.
    pub const SUPPORTED: &'static str = "1.0,1.1,1.2";

    /// Parse a single version string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1.0" => Some(Self::V1_0),
            "1.1" => Some(Self::V1_1),
            "1.2" => Some(Self::V1_2),
            _ => None,
        }
    }

    /// Wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V1_1 => "1.1",
            Self::V1_2 => "1.2",
        }
    }

    /// Header escaping rules of this version.
    #[must_use]
    pub const fn escaping(self) -> Escaping {
        match self {
            Self::V1_0 => Escaping::None,
            Self::V1_1 => Escaping::Basic,
            Self::V1_2 => Escaping::Full,
        }
    }

    /// Pick the highest version from an `accept-version` header. A missing
    /// header means 1.0.
    #[must_use]
    pub fn negotiate(accept_version: Option<&str>) -> Option<Self> {
        match accept_version {
            None => Some(Self::V1_0),
            Some(list) => list.split(',').filter_map(Self::parse).max(),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Protocol violations. Each one ends the session with an `ERROR` frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A frame other than `CONNECT` arrived before the handshake.
    #[error("{0} received before CONNECT")]
    NotConnected(Command),

    /// A second `CONNECT` arrived.
    #[error("session is already connected")]
    AlreadyConnected,

    /// No common protocol version.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// A required header is absent.
    #[error("{command} frame is missing the '{header}' header")]
    MissingHeader {
        /// Frame command.
        command: Command,
        /// Missing header name.
        header: &'static str,
    },

    /// `heart-beat` header is not `cx,cy`.
    #[error("invalid heart-beat header: {0}")]
    InvalidHeartBeat(String),

    /// Destination is not a valid topic.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// Destination is outside every broker prefix.
    #[error("destination '{0}' is not served by this broker")]
    DestinationNotAllowed(String),

    /// Subscription id already in use within the session.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// A server-only command arrived from the client.
    #[error("unexpected {0} frame from client")]
    UnexpectedCommand(Command),

    /// Inbound data could not be decoded.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl SessionError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotConnected(_) => "not_connected",
            Self::AlreadyConnected => "already_connected",
            Self::UnsupportedVersion(_) => "unsupported_version",
            Self::MissingHeader { .. } => "missing_header",
            Self::InvalidHeartBeat(_) => "invalid_heart_beat",
            Self::InvalidDestination(_) => "invalid_destination",
            Self::DestinationNotAllowed(_) => "destination_not_allowed",
            Self::Subscription(_) => "duplicate_subscription",
            Self::UnexpectedCommand(_) => "unexpected_command",
            Self::Frame(_) => "frame",
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Settings shared by every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Heart-beat periods the server offers.
    pub heart_beat: HeartBeat,
    /// Destination prefixes served by the broker.
    pub broker_prefixes: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heart_beat: HeartBeat::new(
                std::time::Duration::from_secs(10),
                std::time::Duration::from_secs(10),
            ),
            broker_prefixes: vec!["/topic/".to_string()],
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for `CONNECT` or `STOMP`.
    AwaitingConnect,
    /// Handshake complete.
    Connected,
    /// Terminated; further frames are ignored.
    Closed,
}

/// Work for the connection task, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Write a frame to the client.
    Send(Frame),
    /// Start forwarding `topic` to the client under `id`.
    Subscribe {
        /// Client-chosen subscription id.
        id: SubscriptionId,
        /// Destination.
        topic: Topic,
    },
    /// Stop forwarding for `id`.
    Unsubscribe {
        /// Client-chosen subscription id.
        id: SubscriptionId,
    },
    /// Publish a client `SEND` to every subscriber of `topic`.
    Relay {
        /// Destination.
        topic: Topic,
        /// MIME type of the body.
        content_type: String,
        /// Raw body.
        body: Vec<u8>,
    },
    /// Arm heart-beat timers with the agreed periods.
    StartHeartbeat(Negotiated),
    /// Close the connection.
    Close,
}

/// Per-connection protocol state.
#[derive(Debug)]
pub struct StompSession {
    id: SessionId,
    config: Arc<SessionConfig>,
    registry: Arc<SubscriptionRegistry>,
    state: SessionState,
    version: Option<StompVersion>,
}

impl StompSession {
    /// Create a session waiting for `CONNECT`.
    #[must_use]
    pub const fn new(
        id: SessionId,
        config: Arc<SessionConfig>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            id,
            config,
            registry,
            state: SessionState::AwaitingConnect,
            version: None,
        }
    }

    /// Session id, sent in the `session` header.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated version, once connected.
    #[must_use]
    pub const fn version(&self) -> Option<StompVersion> {
        self.version
    }

    /// Handle one inbound frame.
    pub fn handle(&mut self, frame: &Frame) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        metrics::record_frame_received(frame.command);

        let receipt = frame.get("receipt");
        match self.dispatch(frame) {
            Ok(mut actions) => {
                if let Some(receipt) = receipt {
                    let frame = Frame::new(Command::Receipt).header("receipt-id", receipt);
                    let at = actions
                        .iter()
                        .position(|a| matches!(a, SessionAction::Close))
                        .unwrap_or(actions.len());
                    actions.insert(at, SessionAction::Send(frame));
                }
                actions
            }
            Err(error) => self.fail(&error, receipt),
        }
    }

    /// End the session with an `ERROR` frame.
    pub fn fail(&mut self, error: &SessionError, receipt: Option<&str>) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        tracing::warn!(session = %self.id, error = %error, "STOMP protocol error");
        metrics::record_protocol_error(error.kind());

        let mut frame = Frame::new(Command::Error).header("message", error.to_string());
        if let Some(receipt) = receipt {
            frame = frame.header("receipt-id", receipt);
        }
        if matches!(error, SessionError::UnsupportedVersion(_)) {
            frame = frame.header("version", StompVersion::SUPPORTED);
        }
        let frame = frame.body("text/plain", error.to_string());

        self.close();
        vec![SessionAction::Send(frame), SessionAction::Close]
    }

    /// Release all subscriptions and mark the session closed.
    ///
    /// Returns the destinations that were released; empty if already closed.
    pub fn close(&mut self) -> Vec<Topic> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        self.state = SessionState::Closed;
        let released = self.registry.session_closed(&self.id);
        metrics::set_subscriptions(self.registry.stats().subscription_count);
        released
    }

    fn dispatch(&mut self, frame: &Frame) -> Result<Vec<SessionAction>, SessionError> {
        match (self.state, frame.command) {
            (_, Command::Connected | Command::Message | Command::Receipt | Command::Error) => {
                Err(SessionError::UnexpectedCommand(frame.command))
            }
            (SessionState::AwaitingConnect, Command::Connect | Command::Stomp) => {
                self.on_connect(frame)
            }
            (SessionState::AwaitingConnect, command) => Err(SessionError::NotConnected(command)),
            (_, Command::Connect | Command::Stomp) => Err(SessionError::AlreadyConnected),
            (_, Command::Subscribe) => self.on_subscribe(frame),
            (_, Command::Unsubscribe) => self.on_unsubscribe(frame),
            (_, Command::Send) => self.on_send(frame),
            (_, Command::Ack | Command::Nack | Command::Begin | Command::Commit | Command::Abort) => {
                Ok(Vec::new())
            }
            (_, Command::Disconnect) => {
                self.close();
                Ok(vec![SessionAction::Close])
            }
        }
    }

    fn on_connect(&mut self, frame: &Frame) -> Result<Vec<SessionAction>, SessionError> {
        let accept = frame.get("accept-version");
        let version = StompVersion::negotiate(accept)
            .ok_or_else(|| SessionError::UnsupportedVersion(accept.unwrap_or_default().to_string()))?;

        let client = match frame.get("heart-beat") {
            None => HeartBeat::DISABLED,
            Some(value) => HeartBeat::parse(value)
                .ok_or_else(|| SessionError::InvalidHeartBeat(value.to_string()))?,
        };
        let negotiated = negotiate(self.config.heart_beat, client);

        self.state = SessionState::Connected;
        self.version = Some(version);
        tracing::debug!(
            session = %self.id,
            version = version.as_str(),
            outgoing_ms = ?negotiated.outgoing.map(|d| d.as_millis()),
            incoming_ms = ?negotiated.incoming.map(|d| d.as_millis()),
            "STOMP session connected"
        );

        let connected = Frame::new(Command::Connected)
            .header("version", version.as_str())
            .header("heart-beat", self.config.heart_beat.header_value())
            .header("server", SERVER_NAME)
            .header("session", self.id.clone());

        Ok(vec![
            SessionAction::Send(connected),
            SessionAction::StartHeartbeat(negotiated),
        ])
    }

    fn on_subscribe(&self, frame: &Frame) -> Result<Vec<SessionAction>, SessionError> {
        let destination = require(frame, "destination")?;
        let id = match (frame.get("id"), self.version) {
            (Some(id), _) => id,
            (None, Some(StompVersion::V1_0)) => destination,
            (None, _) => {
                return Err(SessionError::MissingHeader {
                    command: frame.command,
                    header: "id",
                });
            }
        };
        let topic = self.broker_topic(destination)?;

        self.registry.add(&self.id, id, topic.clone())?;
        metrics::set_subscriptions(self.registry.stats().subscription_count);
        tracing::debug!(session = %self.id, subscription = id, destination = %topic, "subscribed");

        Ok(vec![SessionAction::Subscribe {
            id: id.to_string(),
            topic,
        }])
    }

    fn on_unsubscribe(&self, frame: &Frame) -> Result<Vec<SessionAction>, SessionError> {
        let id = match (frame.get("id"), frame.get("destination"), self.version) {
            (Some(id), _, _) => id,
            (None, Some(destination), Some(StompVersion::V1_0)) => destination,
            _ => {
                return Err(SessionError::MissingHeader {
                    command: frame.command,
                    header: "id",
                });
            }
        };

        if self.registry.remove(&self.id, id).is_none() {
            return Ok(Vec::new());
        }
        metrics::set_subscriptions(self.registry.stats().subscription_count);
        tracing::debug!(session = %self.id, subscription = id, "unsubscribed");

        Ok(vec![SessionAction::Unsubscribe { id: id.to_string() }])
    }

    fn on_send(&self, frame: &Frame) -> Result<Vec<SessionAction>, SessionError> {
        let topic = self.broker_topic(require(frame, "destination")?)?;
        Ok(vec![SessionAction::Relay {
            topic,
            content_type: frame
                .get("content-type")
                .unwrap_or("text/plain")
                .to_string(),
            body: frame.body.clone(),
        }])
    }

    fn broker_topic(&self, destination: &str) -> Result<Topic, SessionError> {
        let topic = Topic::parse(destination)
            .map_err(|e| SessionError::InvalidDestination(e.to_string()))?;
        if self.config.broker_prefixes.iter().any(|p| topic.has_prefix(p)) {
            Ok(topic)
        } else {
            Err(SessionError::DestinationNotAllowed(destination.to_string()))
        }
    }
}

fn require<'a>(frame: &'a Frame, header: &'static str) -> Result<&'a str, SessionError> {
    frame.get(header).ok_or(SessionError::MissingHeader {
        command: frame.command,
        header,
    })
}

/// Build the `MESSAGE` frame delivering `message` to one subscription.
#[must_use]
pub fn message_frame(session: &str, subscription: &str, message: &TopicMessage) -> Frame {
    Frame::new(Command::Message)
        .header("destination", message.topic.destination())
        .header("subscription", subscription)
        .header("message-id", format!("{session}-{}", message.sequence))
        .body(&message.content_type, &*message.body)
}

// =============================================================================
// Tests
// =============================================================================
