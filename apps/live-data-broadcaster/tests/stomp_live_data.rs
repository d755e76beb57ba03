//! STOMP Broker Integration Tests
//!
//! Starts the real axum WebSocket endpoint on an ephemeral port and drives
//! it with a `tokio-tungstenite` client speaking STOMP.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use live_data_broadcaster::infrastructure::stomp::frame::{
    Command, Escaping, Frame, FrameDecoder, Inbound,
};
use live_data_broadcaster::infrastructure::stomp::{HeartBeat, SessionConfig};
use live_data_broadcaster::{
    BroadcastHub, LiveDataMessage, LiveDataService, LiveDataServiceConfig, RandomSampleSource,
    SampleRange, StompServer, StompServerConfig, StompServerState, SubscriptionRegistry,
    SystemClock, Topic,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Harness
// =============================================================================

struct TestBroker {
    addr: SocketAddr,
    hub: Arc<BroadcastHub>,
    registry: Arc<SubscriptionRegistry>,
    state: Arc<StompServerState>,
    cancel: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

async fn start_broker(heart_beat: HeartBeat) -> TestBroker {
    let config = StompServerConfig {
        session: Arc::new(SessionConfig {
            heart_beat,
            ..SessionConfig::default()
        }),
        ..StompServerConfig::default()
    };
    let hub = Arc::new(BroadcastHub::with_defaults());
    let registry = Arc::new(SubscriptionRegistry::new());
    let cancel = CancellationToken::new();
    let state = Arc::new(StompServerState::new(
        config,
        Arc::clone(&hub),
        Arc::clone(&registry),
        cancel.clone(),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_state = Arc::clone(&state);
    let server = tokio::spawn(async move {
        StompServer::serve(listener, server_state).await.unwrap();
    });

    TestBroker {
        addr,
        hub,
        registry,
        state,
        cancel,
        server,
    }
}

struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    protocol: Option<String>,
    decoder: FrameDecoder,
}

impl Client {
    async fn open(addr: SocketAddr) -> Self {
        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("v12.stomp, v11.stomp"),
        );
        let (ws, response) = tokio_tungstenite::connect_async(request).await.unwrap();
        let protocol = response
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        Self {
            ws,
            protocol,
            decoder: FrameDecoder::default(),
        }
    }

    /// Open a socket and complete the STOMP handshake with heart-beats off.
    async fn connect(addr: SocketAddr) -> Self {
        let mut client = Self::open(addr).await;
        client
            .send("CONNECT\naccept-version:1.2\nhost:localhost\nheart-beat:0,0\n\n\0")
            .await;
        let connected = client.recv_frame().await;
        assert_eq!(connected.command, Command::Connected);
        client
    }

    async fn send(&mut self, data: &str) {
        self.ws.send(Message::text(data)).await.unwrap();
    }

    async fn send_binary(&mut self, data: Vec<u8>) {
        self.ws.send(Message::binary(data)).await.unwrap();
    }

    async fn subscribe(&mut self, id: &str, destination: &str) {
        self.send(&format!(
            "SUBSCRIBE\nid:{id}\ndestination:{destination}\nreceipt:sub-{id}\n\n\0"
        ))
        .await;
        let receipt = self.recv_frame().await;
        assert_eq!(receipt.command, Command::Receipt);
        assert_eq!(receipt.get("receipt-id"), Some(format!("sub-{id}").as_str()));
    }

    /// Next raw WebSocket message, skipping control frames.
    async fn recv_raw(&mut self) -> Option<Vec<u8>> {
        loop {
            let next = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for server");
            match next {
                Some(Ok(Message::Text(text))) => return Some(text.as_bytes().to_vec()),
                Some(Ok(Message::Binary(data))) => return Some(data.to_vec()),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
            }
        }
    }

    /// Next STOMP frame, skipping heart-beats.
    async fn recv_frame(&mut self) -> Frame {
        loop {
            let data = self.recv_raw().await.expect("connection closed");
            let items = self.decoder.decode(&data).unwrap();
            if let Some(frame) = items.into_iter().find_map(|item| match item {
                Inbound::Frame(frame) => Some(frame),
                Inbound::Heartbeat => None,
            }) {
                return frame;
            }
        }
    }

    /// Drain until the server closes the connection.
    async fn expect_closed(&mut self) {
        while self.recv_raw().await.is_some() {}
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(RECV_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn default_broker_heart_beat() -> HeartBeat {
    HeartBeat::new(Duration::from_secs(10), Duration::from_secs(10))
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn subprotocol_is_negotiated() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let client = Client::open(broker.addr).await;
    assert_eq!(client.protocol.as_deref(), Some("v12.stomp"));
}

#[tokio::test]
async fn connected_frame_reports_version_and_session() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut client = Client::open(broker.addr).await;

    client
        .send("CONNECT\naccept-version:1.0,1.1,1.2\nheart-beat:10000,10000\n\n\0")
        .await;
    let connected = client.recv_frame().await;

    assert_eq!(connected.command, Command::Connected);
    assert_eq!(connected.get("version"), Some("1.2"));
    assert_eq!(connected.get("heart-beat"), Some("10000,10000"));
    assert!(connected.get("session").is_some_and(|s| !s.is_empty()));

    eventually(|| broker.state.active_sessions() == 1).await;
}

#[tokio::test]
async fn subscriber_receives_live_data_samples() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let service = Arc::new(LiveDataService::new(
        LiveDataServiceConfig {
            topic: Topic::live_data(),
            interval: Duration::from_millis(50),
        },
        Arc::new(RandomSampleSource::new(SampleRange::default()).unwrap()),
        Arc::new(SystemClock),
        Arc::clone(&broker.hub) as _,
    ));
    let publisher = {
        let service = Arc::clone(&service);
        let cancel = broker.cancel.clone();
        tokio::spawn(async move { service.run(cancel).await })
    };

    let mut client = Client::connect(broker.addr).await;
    client.subscribe("sub-0", "/topic/live-data").await;

    let mut previous: Option<LiveDataMessage> = None;
    for _ in 0..3 {
        let frame = client.recv_frame().await;
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("destination"), Some("/topic/live-data"));
        assert_eq!(frame.get("subscription"), Some("sub-0"));
        assert_eq!(frame.get("content-type"), Some("application/json"));
        assert!(frame.get("message-id").is_some());

        let message: LiveDataMessage = serde_json::from_slice(&frame.body).unwrap();
        assert!(
            SampleRange::default().contains(message.value),
            "{} out of range",
            message.value
        );
        if let Some(previous) = previous {
            assert!(message.timestamp >= previous.timestamp);
        }
        previous = Some(message);
    }

    assert!(service.state().deliveries() >= 3);
    broker.cancel.cancel();
    publisher.await.unwrap();
}

#[tokio::test]
async fn every_subscriber_gets_the_same_message() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut alice = Client::connect(broker.addr).await;
    let mut bob = Client::connect(broker.addr).await;
    alice.subscribe("a", "/topic/live-data").await;
    bob.subscribe("b", "/topic/live-data").await;

    let delivered = broker
        .hub
        .send(
            &Topic::live_data(),
            "application/json",
            r#"{"value":95.5,"timestamp":"2026-10-19T10:00:00Z"}"#,
        )
        .unwrap();
    assert_eq!(delivered, 2);

    let to_alice = alice.recv_frame().await;
    let to_bob = bob.recv_frame().await;
    assert_eq!(to_alice.body, to_bob.body);
    assert_eq!(to_alice.get("subscription"), Some("a"));
    assert_eq!(to_bob.get("subscription"), Some("b"));
    assert_ne!(to_alice.get("message-id"), to_bob.get("message-id"));
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut client = Client::connect(broker.addr).await;
    client.subscribe("sub-0", "/topic/live-data").await;
    assert_eq!(broker.registry.subscriber_count(&Topic::live_data()), 1);

    client
        .send("UNSUBSCRIBE\nid:sub-0\nreceipt:unsub\n\n\0")
        .await;
    let receipt = client.recv_frame().await;
    assert_eq!(receipt.get("receipt-id"), Some("unsub"));
    assert_eq!(broker.registry.subscriber_count(&Topic::live_data()), 0);

    eventually(|| broker.hub.receiver_count(&Topic::live_data()) == 0).await;
    assert_eq!(
        broker.hub.send(&Topic::live_data(), "text/plain", "x").unwrap(),
        0
    );
}

#[tokio::test]
async fn send_is_relayed_to_subscribers() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut listener = Client::connect(broker.addr).await;
    let mut sender = Client::connect(broker.addr).await;
    listener.subscribe("chat", "/topic/chat").await;

    sender
        .send("SEND\ndestination:/topic/chat\ncontent-type:text/plain\n\nhello\0")
        .await;

    let frame = listener.recv_frame().await;
    assert_eq!(frame.command, Command::Message);
    assert_eq!(frame.get("destination"), Some("/topic/chat"));
    assert_eq!(frame.get("content-type"), Some("text/plain"));
    assert_eq!(frame.body_text(), "hello");
}

#[tokio::test]
async fn frame_before_connect_gets_error_and_close() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut client = Client::open(broker.addr).await;

    client
        .send("SUBSCRIBE\nid:0\ndestination:/topic/live-data\n\n\0")
        .await;
    let error = client.recv_frame().await;
    assert_eq!(error.command, Command::Error);
    assert!(error.get("message").unwrap().contains("before CONNECT"));

    client.expect_closed().await;
    eventually(|| broker.state.active_sessions() == 0).await;
}

#[tokio::test]
async fn malformed_frame_gets_error_and_close() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut client = Client::connect(broker.addr).await;

    client.send("SUBSCRIBE\nid:0\n\nno terminator").await;
    let error = client.recv_frame().await;
    assert_eq!(error.command, Command::Error);

    client.expect_closed().await;
}

#[tokio::test]
async fn disconnect_releases_subscriptions() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut client = Client::connect(broker.addr).await;
    client.subscribe("a", "/topic/live-data").await;
    client.subscribe("b", "/topic/other").await;
    assert_eq!(broker.registry.stats().subscription_count, 2);

    client.send("DISCONNECT\nreceipt:bye\n\n\0").await;
    let receipt = client.recv_frame().await;
    assert_eq!(receipt.command, Command::Receipt);
    assert_eq!(receipt.get("receipt-id"), Some("bye"));

    client.expect_closed().await;
    assert_eq!(broker.registry.stats().subscription_count, 0);
    eventually(|| broker.state.active_sessions() == 0).await;
}

#[tokio::test]
async fn dropped_socket_releases_subscriptions() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut client = Client::connect(broker.addr).await;
    client.subscribe("a", "/topic/live-data").await;

    drop(client);

    eventually(|| broker.registry.stats().subscription_count == 0).await;
    eventually(|| broker.state.active_sessions() == 0).await;
}

#[tokio::test]
async fn server_sends_heart_beats() {
    let broker = start_broker(HeartBeat::new(
        Duration::from_millis(50),
        Duration::ZERO,
    ))
    .await;
    let mut client = Client::open(broker.addr).await;
    client
        .send("CONNECT\naccept-version:1.2\nheart-beat:0,50\n\n\0")
        .await;
    let connected = client.recv_frame().await;
    assert_eq!(connected.get("heart-beat"), Some("50,0"));

    let beat = client.recv_raw().await.unwrap();
    assert_eq!(beat, b"\n");
}

#[tokio::test]
async fn silent_client_is_disconnected() {
    let broker = start_broker(HeartBeat::new(
        Duration::ZERO,
        Duration::from_millis(50),
    ))
    .await;
    let mut client = Client::open(broker.addr).await;
    client
        .send("CONNECT\naccept-version:1.2\nheart-beat:50,0\n\n\0")
        .await;
    assert_eq!(client.recv_frame().await.command, Command::Connected);

    client.expect_closed().await;
    eventually(|| broker.state.active_sessions() == 0).await;
}

#[tokio::test]
async fn client_heart_beats_keep_connection_open() {
    let broker = start_broker(HeartBeat::new(
        Duration::ZERO,
        Duration::from_millis(100),
    ))
    .await;
    let mut client = Client::open(broker.addr).await;
    client
        .send("CONNECT\naccept-version:1.2\nheart-beat:100,0\n\n\0")
        .await;
    assert_eq!(client.recv_frame().await.command, Command::Connected);

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(80)).await;
        client.send("\n").await;
    }
    client.subscribe("still-here", "/topic/live-data").await;
}

#[tokio::test]
async fn shutdown_closes_open_sessions() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut client = Client::connect(broker.addr).await;
    client.subscribe("a", "/topic/live-data").await;

    broker.cancel.cancel();

    client.expect_closed().await;
    timeout(RECV_TIMEOUT, broker.server)
        .await
        .expect("server did not stop")
        .unwrap();
    assert_eq!(broker.registry.stats().subscription_count, 0);
}

#[tokio::test]
async fn several_large_frames_in_one_message_are_all_delivered() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut listener = Client::connect(broker.addr).await;
    let mut sender = Client::connect(broker.addr).await;
    listener.subscribe("chat", "/topic/chat").await;

    let body = "x".repeat(40_000);
    let frame = format!("SEND\ndestination:/topic/chat\ncontent-type:text/plain\n\n{body}\0");
    sender.send(&frame.repeat(2)).await;

    for _ in 0..2 {
        let message = listener.recv_frame().await;
        assert_eq!(message.command, Command::Message);
        assert_eq!(message.body.len(), 40_000);
    }

    sender.send("DISCONNECT\nreceipt:done\n\n\0").await;
    assert_eq!(sender.recv_frame().await.get("receipt-id"), Some("done"));
}

#[tokio::test]
async fn oversized_frame_gets_error_and_close() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut client = Client::connect(broker.addr).await;

    let body = "x".repeat(70_000);
    client
        .send(&format!("SEND\ndestination:/topic/chat\n\n{body}\0"))
        .await;

    let error = client.recv_frame().await;
    assert_eq!(error.command, Command::Error);
    assert_eq!(error.get("message"), Some("frame exceeds 65536 bytes"));
    client.expect_closed().await;
}

#[tokio::test]
async fn binary_send_is_relayed_byte_for_byte() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut listener = Client::connect(broker.addr).await;
    let mut sender = Client::connect(broker.addr).await;
    listener.subscribe("bin", "/topic/bin").await;

    let mut frame =
        b"SEND\ndestination:/topic/bin\ncontent-type:application/octet-stream\ncontent-length:2\n\n"
            .to_vec();
    frame.extend_from_slice(&[0xff, 0x00, 0x00]);
    sender.send_binary(frame).await;

    let message = listener.recv_frame().await;
    assert_eq!(message.body, vec![0xff, 0x00]);
    assert_eq!(message.get("content-length"), Some("2"));
    assert_eq!(message.get("content-type"), Some("application/octet-stream"));
}

#[tokio::test]
async fn channels_for_abandoned_destinations_are_released() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut client = Client::connect(broker.addr).await;

    for n in 0..50 {
        let id = format!("s{n}");
        client.subscribe(&id, &format!("/topic/t{n}")).await;
        client
            .send(&format!("UNSUBSCRIBE\nid:{id}\nreceipt:u{n}\n\n\0"))
            .await;
        assert_eq!(client.recv_frame().await.command, Command::Receipt);
    }
    assert_eq!(broker.hub.stats().topics, 0);

    for n in 0..5 {
        client.subscribe(&format!("k{n}"), &format!("/topic/k{n}")).await;
    }
    assert_eq!(broker.hub.stats().topics, 5);

    drop(client);
    eventually(|| broker.hub.stats().topics == 0).await;
}

#[tokio::test]
async fn stomp_1_0_headers_are_taken_literally() {
    let broker = start_broker(default_broker_heart_beat()).await;
    let mut client = Client::open(broker.addr).await;
    client.send("CONNECT\nheart-beat:0,0\n\n\0").await;
    let connected = client.recv_frame().await;
    assert_eq!(connected.get("version"), Some("1.0"));

    client.decoder.set_escaping(Escaping::None);
    client
        .send("SUBSCRIBE\nid:a\\b\ndestination:/topic/live-data\nreceipt:r\\1\n\n\0")
        .await;
    let receipt = client.recv_frame().await;
    assert_eq!(receipt.command, Command::Receipt);
    assert_eq!(receipt.get("receipt-id"), Some("r\\1"));

    broker
        .hub
        .send(&Topic::live_data(), "text/plain", "hi")
        .unwrap();
    let message = client.recv_frame().await;
    assert_eq!(message.get("subscription"), Some("a\\b"));
}
