//! STOMP-over-WebSocket Server
//!
//! Serves the broker endpoint (default `/ws`) with axum. Each upgraded
//! socket gets one connection task that owns a [`StompSession`], plus one
//! forwarding task per subscription that bridges a broadcast receiver into
//! the connection's outbound queue.
//!
//! ```text
//! BroadcastHub ──rx──► forwarder ──┐
//! BroadcastHub ──rx──► forwarder ──┼──► mpsc ──► writer ──► WebSocket
//!              session replies ────┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::frame::{self, Escaping, Frame, FrameDecoder, FrameError, Inbound};
use super::heartbeat::{self, HeartbeatState, Negotiated};
use super::session::{
    SessionAction, SessionConfig, SessionError, StompSession, StompVersion, message_frame,
};
use crate::domain::subscription::{SubscriptionId, SubscriptionRegistry};
use crate::domain::topic::Topic;
use crate::infrastructure::broadcast::{SharedBroadcastHub, TopicMessage};
use crate::infrastructure::config::{ServerSettings, StompSettings};
use crate::infrastructure::metrics;

/// WebSocket subprotocols offered during the upgrade, preferred first.
pub const SUBPROTOCOLS: [&str; 3] = ["v12.stomp", "v11.stomp", "v10.stomp"];

/// Time allowed for the close handshake once a connection ends.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Configuration and State
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct StompServerConfig {
    /// WebSocket endpoint path.
    pub path: String,
    /// Protocol settings shared by every session.
    pub session: Arc<SessionConfig>,
    /// Largest inbound STOMP frame accepted.
    pub max_frame_bytes: usize,
    /// Largest inbound WebSocket message accepted.
    pub max_message_bytes: usize,
    /// Outbound frames queued per connection.
    pub outbound_buffer: usize,
}

impl Default for StompServerConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default(), &StompSettings::default())
    }
}

impl StompServerConfig {
    /// Build from loaded settings.
    #[must_use]
    pub fn from_settings(server: &ServerSettings, stomp: &StompSettings) -> Self {
        Self {
            path: server.ws_path.clone(),
            session: Arc::new(SessionConfig {
                heart_beat: heartbeat::HeartBeat::new(stomp.heartbeat_send, stomp.heartbeat_recv),
                broker_prefixes: stomp.broker_prefixes.clone(),
            }),
            max_frame_bytes: stomp.max_frame_bytes,
            max_message_bytes: stomp.max_message_bytes,
            outbound_buffer: stomp.outbound_buffer,
        }
    }
}

/// State shared by every connection.
#[derive(Debug)]
pub struct StompServerState {
    config: StompServerConfig,
    hub: SharedBroadcastHub,
    registry: Arc<SubscriptionRegistry>,
    active_sessions: AtomicUsize,
    cancel: CancellationToken,
}

impl StompServerState {
    /// Create server state.
    #[must_use]
    pub const fn new(
        config: StompServerConfig,
        hub: SharedBroadcastHub,
        registry: Arc<SubscriptionRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            hub,
            registry,
            active_sessions: AtomicUsize::new(0),
            cancel,
        }
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Broadcast hub.
    #[must_use]
    pub const fn hub(&self) -> &SharedBroadcastHub {
        &self.hub
    }

    fn session_opened(&self) {
        let active = self.active_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_stomp_sessions(active);
    }

    fn session_closed(&self) {
        let active = self.active_sessions.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::set_stomp_sessions(active);
    }
}

// =============================================================================
// Server
// =============================================================================

/// STOMP server errors.
#[derive(Debug, thiserror::Error)]
pub enum StompServerError {
    /// Failed to bind to port.
    #[error("failed to bind STOMP server to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error during operation.
    #[error("STOMP server error: {0}")]
    ServerFailed(String),
}

/// STOMP-over-WebSocket server.
pub struct StompServer {
    port: u16,
    state: Arc<StompServerState>,
}

impl StompServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<StompServerState>) -> Self {
        Self { port, state }
    }

    /// Build the router serving the WebSocket endpoint.
    pub fn router(state: Arc<StompServerState>) -> Router {
        let path = state.config.path.clone();
        Router::new()
            .route(&path, get(ws_handler))
            .with_state(state)
    }

    /// Bind to the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or encounters a fatal error.
    pub async fn run(self) -> Result<(), StompServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StompServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(
            port = self.port,
            path = %self.state.config.path,
            "STOMP server listening"
        );

        Self::serve(listener, self.state).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a fatal error.
    pub async fn serve(
        listener: TcpListener,
        state: Arc<StompServerState>,
    ) -> Result<(), StompServerError> {
        let cancel = state.cancel.clone();
        axum::serve(listener, Self::router(state))
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| StompServerError::ServerFailed(e.to_string()))?;

        tracing::info!("STOMP server shutdown complete");
        Ok(())
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<StompServerState>>,
) -> Response {
    ws.protocols(SUBPROTOCOLS)
        .max_message_size(state.config.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

// =============================================================================
// Connection
// =============================================================================

/// Items queued for the socket writer.
#[derive(Debug)]
enum Outbound {
    Frame(Frame, Escaping),
    Heartbeat,
    Pong(Bytes),
    Close,
}

/// A running forwarder and the destination it drains.
#[derive(Debug)]
struct Forwarder {
    topic: Topic,
    task: JoinHandle<()>,
}

async fn handle_socket(socket: WebSocket, state: Arc<StompServerState>) {
    let session_id = Uuid::new_v4().simple().to_string();
    let (sink, mut stream) = socket.split();
    let (outbound, rx) = mpsc::channel(state.config.outbound_buffer);
    let mut writer = tokio::spawn(write_loop(sink, rx));

    state.session_opened();
    tracing::info!(session = %session_id, "STOMP connection opened");

    let mut connection = Connection {
        session: StompSession::new(
            session_id.clone(),
            Arc::clone(&state.config.session),
            Arc::clone(&state.registry),
        ),
        decoder: FrameDecoder::new(state.config.max_frame_bytes),
        state: Arc::clone(&state),
        outbound,
        forwarders: HashMap::new(),
        liveness: HeartbeatState::new(),
        incoming: None,
        send_timer: None,
        recv_timer: None,
    };

    connection.read_loop(&mut stream).await;
    connection.shutdown().await;

    if tokio::time::timeout(CLOSE_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    state.session_closed();
    tracing::info!(session = %session_id, "STOMP connection closed");
}

struct Connection {
    state: Arc<StompServerState>,
    session: StompSession,
    decoder: FrameDecoder,
    outbound: mpsc::Sender<Outbound>,
    forwarders: HashMap<SubscriptionId, Forwarder>,
    liveness: HeartbeatState,
    incoming: Option<Duration>,
    send_timer: Option<Interval>,
    recv_timer: Option<Interval>,
}

impl Connection {
    async fn read_loop(&mut self, stream: &mut SplitStream<WebSocket>) {
        let cancel = self.state.cancel.clone();

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::debug!(session = %self.session.id(), "closing connection for shutdown");
                    break;
                }

                message = stream.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => {
                            tracing::debug!(session = %self.session.id(), error = %e, "WebSocket read failed");
                            break;
                        }
                        None => break,
                    };
                    if self.on_message(message).await.is_break() {
                        break;
                    }
                }

                () = heartbeat::tick(&mut self.send_timer) => {
                    if self.send_heartbeat().is_break() {
                        break;
                    }
                }

                () = heartbeat::tick(&mut self.recv_timer) => {
                    if let Some(incoming) = self.incoming
                        && self.liveness.is_expired(incoming)
                    {
                        tracing::warn!(
                            session = %self.session.id(),
                            silent_ms = ?self.liveness.time_since_inbound().as_millis(),
                            "heart-beat timeout, closing connection"
                        );
                        break;
                    }
                }
            }
        }
    }

    /// Queue a heart-beat without waiting. A full queue already carries
    /// traffic, so the beat is skipped.
    fn send_heartbeat(&self) -> ControlFlow<()> {
        match self.outbound.try_send(Outbound::Heartbeat) {
            Ok(()) => ControlFlow::Continue(()),
            Err(TrySendError::Full(_)) => {
                tracing::trace!(session = %self.session.id(), "outbound queue full, heart-beat skipped");
                ControlFlow::Continue(())
            }
            Err(TrySendError::Closed(_)) => ControlFlow::Break(()),
        }
    }

    fn escaping(&self) -> Escaping {
        self.session
            .version()
            .map_or(Escaping::Full, StompVersion::escaping)
    }

    async fn on_message(&mut self, message: Message) -> ControlFlow<()> {
        self.liveness.record_inbound();

        match message {
            Message::Text(text) => self.on_data(text.as_str().as_bytes()).await,
            Message::Binary(data) => self.on_data(&data).await,
            Message::Ping(payload) => {
                if self.outbound.send(Outbound::Pong(payload)).await.is_err() {
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            }
            Message::Pong(_) => ControlFlow::Continue(()),
            Message::Close(_) => ControlFlow::Break(()),
        }
    }

    /// Decode and handle one frame at a time, so frames following a
    /// `CONNECT` in the same message use the negotiated escaping.
    async fn on_data(&mut self, data: &[u8]) -> ControlFlow<()> {
        if data.is_empty() {
            return self.reject(FrameError::Empty).await;
        }

        let mut pos = 0;
        while pos < data.len() {
            let (item, next) = match self.decoder.decode_next(data, pos) {
                Ok(decoded) => decoded,
                Err(e) => return self.reject(e).await,
            };
            pos = next;

            if let Inbound::Frame(frame) = item {
                let actions = self.session.handle(&frame);
                let escaping = self.escaping();
                self.decoder.set_escaping(escaping);
                self.apply(actions).await?;
            }
        }
        ControlFlow::Continue(())
    }

    async fn reject(&mut self, error: FrameError) -> ControlFlow<()> {
        let actions = self.session.fail(&SessionError::from(error), None);
        self.apply(actions).await
    }

    async fn apply(&mut self, actions: Vec<SessionAction>) -> ControlFlow<()> {
        for action in actions {
            match action {
                SessionAction::Send(frame) => {
                    let escaping = self.escaping();
                    if self.outbound.send(Outbound::Frame(frame, escaping)).await.is_err() {
                        return ControlFlow::Break(());
                    }
                }
                SessionAction::Subscribe { id, topic } => self.start_forwarder(id, topic)?,
                SessionAction::Unsubscribe { id } => {
                    if let Some(forwarder) = self.forwarders.remove(&id) {
                        self.stop_forwarder(forwarder).await;
                    }
                }
                SessionAction::Relay {
                    topic,
                    content_type,
                    body,
                } => match self.state.hub.send(&topic, &content_type, body) {
                    Ok(delivered) => {
                        tracing::debug!(session = %self.session.id(), destination = %topic, delivered, "relayed SEND");
                    }
                    Err(e) => {
                        tracing::warn!(session = %self.session.id(), destination = %topic, error = %e, "relay failed");
                    }
                },
                SessionAction::StartHeartbeat(negotiated) => self.arm_heartbeat(negotiated),
                SessionAction::Close => return ControlFlow::Break(()),
            }
        }
        ControlFlow::Continue(())
    }

    fn start_forwarder(&mut self, id: SubscriptionId, topic: Topic) -> ControlFlow<()> {
        let Some(rx) = self.state.hub.subscribe(&topic) else {
            tracing::debug!(session = %self.session.id(), "hub closed, dropping subscription");
            return ControlFlow::Break(());
        };

        let task = tokio::spawn(forward(
            self.session.id().to_string(),
            id.clone(),
            self.escaping(),
            rx,
            self.outbound.clone(),
        ));
        if let Some(previous) = self.forwarders.insert(id, Forwarder { topic, task }) {
            previous.task.abort();
        }
        ControlFlow::Continue(())
    }

    /// Stop a forwarder and drop its destination's channel if nobody else
    /// listens to it.
    async fn stop_forwarder(&self, forwarder: Forwarder) {
        let Forwarder { topic, task } = forwarder;
        task.abort();
        // The receiver is dropped once the aborted task has finished.
        let _ = task.await;
        self.state.hub.release(&topic);
    }

    fn arm_heartbeat(&mut self, negotiated: Negotiated) {
        self.send_timer = negotiated.outgoing.map(heartbeat::timer);
        self.recv_timer = negotiated.incoming.map(heartbeat::timer);
        self.incoming = negotiated.incoming;
        self.liveness.record_inbound();
    }

    async fn shutdown(mut self) {
        let forwarders: Vec<Forwarder> = self.forwarders.drain().map(|(_, f)| f).collect();
        for forwarder in forwarders {
            self.stop_forwarder(forwarder).await;
        }
        self.session.close();

        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.outbound.send(Outbound::Close)).await;
    }
}

/// Deliver every message on `rx` to the connection as `MESSAGE` frames.
async fn forward(
    session: String,
    subscription: SubscriptionId,
    escaping: Escaping,
    mut rx: broadcast::Receiver<TopicMessage>,
    outbound: mpsc::Sender<Outbound>,
) {
    loop {
        match rx.recv().await {
            Ok(message) => {
                let frame = message_frame(&session, &subscription, &message);
                if outbound.send(Outbound::Frame(frame, escaping)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    session = %session,
                    subscription = %subscription,
                    skipped,
                    "subscriber lagging, messages dropped"
                );
                metrics::record_messages_dropped(skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
) {
    while let Some(outbound) = rx.recv().await {
        let message = match outbound {
            Outbound::Frame(frame, escaping) => encode(&frame, escaping),
            Outbound::Heartbeat => Message::Text(Utf8Bytes::from_static(frame::heartbeat())),
            Outbound::Pong(payload) => Message::Pong(payload),
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };

        if let Err(e) = sink.send(message).await {
            tracing::debug!(error = %e, "WebSocket write failed");
            break;
        }
    }
    let _ = sink.close().await;
}

fn encode(frame: &Frame, escaping: Escaping) -> Message {
    match String::from_utf8(frame.encode_with(escaping)) {
        Ok(text) => Message::Text(text.into()),
        Err(e) => Message::Binary(e.into_bytes().into()),
    }
}

// =============================================================================
// Tests
// =============================================================================
