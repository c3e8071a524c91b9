//! Integration test harness
//!
//! Provides:
//! - Call and room fixtures wired to the in-memory fakes from
//!   `tandem_rtc::testing`
//! - [`TestHub`], a loopback WebSocket hub for exercising the real client
//! - [`eventually`] for waiting on state published by background tasks

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_rtc::signaling::HubEvent;
use tandem_rtc::testing::{FakeChannel, FakeConnectionFactory, FakeConnector};
use tandem_rtc::{
    CallSession, Collaborators, PeerId, RoomSession, RtcConfig, SilentMediaDevices, StaticToken,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,tandem_rtc=debug")
        .with_test_writer()
        .try_init();
}

/// Short ticks so duration tests stay fast
pub fn test_config() -> RtcConfig {
    RtcConfig {
        duration_tick_ms: 100,
        ..Default::default()
    }
}

/// Poll `condition` until it holds; panics after two seconds
pub async fn eventually<F: FnMut() -> bool>(what: &str, mut condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn peer(id: &str) -> PeerId {
    PeerId::from(id)
}

// ============================================================================
// Call fixture
// ============================================================================

/// A call session over a fake channel
pub struct CallFixture {
    pub session: CallSession,
    pub channel: Arc<FakeChannel>,
    pub factory: Arc<FakeConnectionFactory>,
    pub devices: Arc<SilentMediaDevices>,
}

impl CallFixture {
    pub fn new() -> Self {
        Self::with_devices(SilentMediaDevices::new())
    }

    pub fn with_devices(devices: SilentMediaDevices) -> Self {
        init_logging();
        let channel = FakeChannel::new();
        let factory = Arc::new(FakeConnectionFactory::new());
        let devices = Arc::new(devices);
        let collab = Collaborators {
            connector: Arc::new(FakeConnector::new()),
            tokens: Arc::new(StaticToken("call-token".to_string())),
            connections: factory.clone(),
            devices: devices.clone(),
            directory: None,
        };
        let session = CallSession::with_channel(test_config(), collab, channel.clone())
            .expect("valid call session");
        Self {
            session,
            channel,
            factory,
            devices,
        }
    }
}

// ============================================================================
// Room fixture
// ============================================================================

/// A room session joined through a fake connector
pub struct RoomFixture {
    pub session: RoomSession,
    pub connector: Arc<FakeConnector>,
    pub factory: Arc<FakeConnectionFactory>,
    pub devices: Arc<SilentMediaDevices>,
}

/// Join response naming `self_id` with `role` and the given `(peer_id, name)` roster
pub fn join_reply(self_id: &str, role: &str, others: &[(&str, &str)]) -> Value {
    let participants: Vec<Value> = others
        .iter()
        .map(|(id, name)| json!({ "peer_id": id, "display_name": name, "role": "participant" }))
        .collect();
    json!({ "peer_id": self_id, "role": role, "participants": participants })
}

impl RoomFixture {
    pub fn new() -> Self {
        init_logging();
        let connector = Arc::new(FakeConnector::new());
        let factory = Arc::new(FakeConnectionFactory::new());
        let devices = Arc::new(SilentMediaDevices::new());
        let collab = Collaborators {
            connector: connector.clone(),
            tokens: Arc::new(StaticToken("room-token".to_string())),
            connections: factory.clone(),
            devices: devices.clone(),
            directory: None,
        };
        let session = RoomSession::new(test_config(), collab).expect("valid room session");
        Self {
            session,
            connector,
            factory,
            devices,
        }
    }

    /// Queue a channel answering `room.join` with `reply`
    pub fn queue_channel(&self, reply: Value) -> Arc<FakeChannel> {
        let channel = FakeChannel::new();
        channel.reply("room.join", reply);
        self.connector.enqueue(channel.clone());
        channel
    }

    /// Join `room_id` as `self_id` with the given role and roster
    pub async fn joined(
        self_id: &str,
        role: &str,
        others: &[(&str, &str)],
    ) -> (Self, Arc<FakeChannel>) {
        let fixture = Self::new();
        let channel = fixture.queue_channel(join_reply(self_id, role, others));
        fixture
            .session
            .connect_to_room("room-1", self_id)
            .await
            .expect("join room");
        (fixture, channel)
    }
}

// ============================================================================
// Loopback hub
// ============================================================================

/// Minimal JSON-RPC hub on a random local port
///
/// - `room.join` answers with a host role
/// - `room.end` answers with a not-authorized error
/// - `room.raise_hand` pushes a `participant.hand_changed` notification first
/// - `room.leave` closes the socket without answering
/// - anything else answers `null`
pub struct TestHub {
    pub url: String,
    auth_headers: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    acceptor: JoinHandle<()>,
}

impl TestHub {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind hub");
        let addr = listener.local_addr().expect("hub address");
        let auth_headers = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let headers = auth_headers.clone();
        let count = connections.clone();
        let acceptor = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                count.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, headers.clone()));
            }
        });

        Self {
            url: format!("ws://{}/hubs/signaling", addr),
            auth_headers,
            connections,
            acceptor,
        }
    }

    /// Authorization headers presented on each handshake
    pub fn auth_headers(&self) -> Vec<String> {
        self.auth_headers.lock().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Stop accepting new connections; open sockets stay up
    pub fn stop_accepting(&self) {
        self.acceptor.abort();
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn serve(stream: TcpStream, headers: Arc<Mutex<Vec<String>>>) {
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if let Some(value) = request.headers().get("authorization") {
            headers
                .lock()
                .push(value.to_str().unwrap_or_default().to_string());
        }
        Ok(response)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Value = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(_) => continue,
        };
        let id = frame["id"].clone();
        let method = frame["method"].as_str().unwrap_or_default().to_string();

        let reply = match method.as_str() {
            "room.join" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "peer_id": "me", "role": "host", "participants": [] }
            }),
            "room.end" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32002, "message": "Not authorized" }
            }),
            "room.raise_hand" => {
                let event = HubEvent::HandChanged {
                    peer_id: PeerId::from("me"),
                    raised: frame["params"]["raised"].as_bool().unwrap_or_default(),
                };
                let notification = event.to_notification().expect("encode notification");
                let text = serde_json::to_string(&notification).expect("serialize notification");
                if ws.send(Message::Text(text)).await.is_err() {
                    return;
                }
                json!({ "jsonrpc": "2.0", "id": id, "result": null })
            }
            "room.leave" => {
                let _ = ws.close(None).await;
                return;
            }
            _ => json!({ "jsonrpc": "2.0", "id": id, "result": null }),
        };

        if ws.send(Message::Text(reply.to_string())).await.is_err() {
            return;
        }
    }
}
