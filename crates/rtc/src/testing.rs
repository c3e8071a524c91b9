//! In-memory fakes for the connection and signaling ports
//!
//! Compiled for unit tests and behind the `testing` feature for the
//! integration tests under `tests/`.

use crate::media::MediaStream;
use crate::peer::{
    ConnectionEvents, ConnectionFactory, ConnectionState, IceCandidate, PeerId, RtcConnection,
    SessionDescription,
};
use crate::signaling::{
    ChannelEvent, ChannelStatus, HubEvent, HubRequest, SignalingChannel, SignalingConnector,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Peer connections
// ---------------------------------------------------------------------------

/// One call made on a [`FakeConnection`]
#[derive(Debug, Clone, PartialEq)]
pub enum FakeOp {
    CreateOffer,
    CreateAnswer,
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    AttachStream(String),
    Close,
}

/// Records every operation; SDP is a readable placeholder
pub struct FakeConnection {
    peer_id: PeerId,
    events: ConnectionEvents,
    ops: Mutex<Vec<FakeOp>>,
    attached: Mutex<Vec<MediaStream>>,
    closed: AtomicBool,
    reject_remote: bool,
    offers: AtomicUsize,
}

impl FakeConnection {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn ops(&self) -> Vec<FakeOp> {
        self.ops.lock().clone()
    }

    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                FakeOp::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                FakeOp::SetRemote(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn attached_streams(&self) -> Vec<MediaStream> {
        self.attached.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Pretend a remote stream arrived
    pub fn emit_remote_stream(&self, stream: MediaStream) {
        (self.events.on_remote_stream)(stream);
    }

    /// Pretend ICE gathered a local candidate
    pub fn emit_local_candidate(&self, candidate: IceCandidate) {
        (self.events.on_local_candidate)(candidate);
    }

    /// Pretend the connection changed state
    pub fn emit_state(&self, state: ConnectionState) {
        (self.events.on_state_change)(state);
    }

    fn record(&self, op: FakeOp) -> Result<()> {
        if self.is_closed() {
            return Err(Error::WebRtc("connection closed".to_string()));
        }
        self.ops.lock().push(op);
        Ok(())
    }
}

#[async_trait]
impl RtcConnection for FakeConnection {
    async fn create_offer(&self) -> Result<String> {
        self.record(FakeOp::CreateOffer)?;
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("offer:{}:{}", self.peer_id, n))
    }

    async fn create_answer(&self) -> Result<String> {
        self.record(FakeOp::CreateAnswer)?;
        Ok(format!("answer:{}", self.peer_id))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if self.reject_remote {
            return Err(Error::WebRtc("remote description rejected".to_string()));
        }
        self.record(FakeOp::SetRemote(description))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(FakeOp::AddCandidate(candidate))
    }

    async fn attach_local_stream(&self, stream: &MediaStream) -> Result<()> {
        self.record(FakeOp::AttachStream(stream.id().to_string()))?;
        self.attached.lock().push(stream.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.ops.lock().push(FakeOp::Close);
        }
        Ok(())
    }
}

/// Hands out [`FakeConnection`]s and keeps every one it created
#[derive(Default)]
pub struct FakeConnectionFactory {
    created: Mutex<Vec<Arc<FakeConnection>>>,
    reject_remote: Mutex<HashSet<PeerId>>,
}

impl FakeConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections created for `peer_id` from now on reject remote descriptions
    pub fn fail_remote_description_for(&self, peer_id: &PeerId) {
        self.reject_remote.lock().insert(peer_id.clone());
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Most recent connection for `peer_id`
    pub fn connection(&self, peer_id: &PeerId) -> Option<Arc<FakeConnection>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|c| &c.peer_id == peer_id)
            .cloned()
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.created.lock().clone()
    }

    /// Connections not closed yet
    pub fn open_count(&self) -> usize {
        self.created.lock().iter().filter(|c| !c.is_closed()).count()
    }
}

#[async_trait]
impl ConnectionFactory for FakeConnectionFactory {
    async fn create(
        &self,
        peer_id: &PeerId,
        events: ConnectionEvents,
    ) -> Result<Arc<dyn RtcConnection>> {
        let connection = Arc::new(FakeConnection {
            peer_id: peer_id.clone(),
            events,
            ops: Mutex::new(Vec::new()),
            attached: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            reject_remote: self.reject_remote.lock().contains(peer_id),
            offers: AtomicUsize::new(0),
        });
        self.created.lock().push(Arc::clone(&connection));
        Ok(connection)
    }
}

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

/// Scripted hub reply
#[derive(Debug, Clone)]
enum Reply {
    Value(serde_json::Value),
    Error { code: i32, message: String },
}

/// Signaling channel driven by the test
pub struct FakeChannel {
    requests: Mutex<Vec<HubRequest>>,
    replies: Mutex<HashMap<String, Reply>>,
    events: broadcast::Sender<ChannelEvent>,
    status: RwLock<ChannelStatus>,
    disconnects: AtomicUsize,
}

impl Default for FakeChannel {
    fn default() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            events,
            status: RwLock::new(ChannelStatus::Connected),
            disconnects: AtomicUsize::new(0),
        }
    }
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer `method` with `value` from now on (default is `null`)
    pub fn reply(&self, method: &str, value: serde_json::Value) {
        self.replies
            .lock()
            .insert(method.to_string(), Reply::Value(value));
    }

    /// Answer `method` with a hub error from now on
    pub fn reject(&self, method: &str, code: i32, message: &str) {
        self.replies.lock().insert(
            method.to_string(),
            Reply::Error {
                code,
                message: message.to_string(),
            },
        );
    }

    pub fn requests(&self) -> Vec<HubRequest> {
        self.requests.lock().clone()
    }

    /// Requests sent with the given wire method
    pub fn requests_for(&self, method: &str) -> Vec<HubRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method() == method)
            .cloned()
            .collect()
    }

    /// Wait until `count` requests of `method` were sent
    pub async fn wait_for(&self, method: &str, count: usize) -> Vec<HubRequest> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let seen = self.requests_for(method);
            if seen.len() >= count || tokio::time::Instant::now() >= deadline {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Deliver a hub notification
    pub fn push(&self, event: HubEvent) {
        let _ = self.events.send(ChannelEvent::Hub(event));
    }

    /// Simulate an unexpected socket drop
    pub fn drop_connection(&self) {
        *self.status.write() = ChannelStatus::Reconnecting;
        let _ = self.events.send(ChannelEvent::Reconnecting { attempt: 1 });
    }

    /// Simulate a successful reconnect
    pub fn restore(&self) {
        *self.status.write() = ChannelStatus::Connected;
        let _ = self.events.send(ChannelEvent::Reconnected);
    }

    /// Simulate reconnection giving up
    pub fn close(&self, reason: &str) {
        *self.status.write() = ChannelStatus::Disconnected;
        let _ = self.events.send(ChannelEvent::Closed {
            reason: reason.to_string(),
        });
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingChannel for FakeChannel {
    async fn invoke(&self, request: HubRequest) -> Result<serde_json::Value> {
        let status = *self.status.read();
        if status != ChannelStatus::Connected {
            return Err(Error::NotConnected(format!("Channel is {:?}", status)));
        }

        let reply = self.replies.lock().get(request.method()).cloned();
        self.requests.lock().push(request);

        match reply {
            Some(Reply::Value(value)) => Ok(value),
            Some(Reply::Error { code, message }) => Err(Error::Signaling { code, message }),
            None => Ok(serde_json::Value::Null),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    fn status(&self) -> ChannelStatus {
        *self.status.read()
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        *self.status.write() = ChannelStatus::Disconnected;
    }
}

/// Connector that hands out [`FakeChannel`]s
#[derive(Default)]
pub struct FakeConnector {
    queued: Mutex<VecDeque<Arc<FakeChannel>>>,
    opened: Mutex<Vec<Arc<FakeChannel>>>,
    tokens: Mutex<Vec<String>>,
    refuse: Mutex<Option<String>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out `channel` on the next connect
    pub fn enqueue(&self, channel: Arc<FakeChannel>) {
        self.queued.lock().push_back(channel);
    }

    /// Fail every connect with a handshake error
    pub fn refuse(&self, reason: &str) {
        *self.refuse.lock() = Some(reason.to_string());
    }

    pub fn opened(&self) -> Vec<Arc<FakeChannel>> {
        self.opened.lock().clone()
    }

    pub fn last_channel(&self) -> Option<Arc<FakeChannel>> {
        self.opened.lock().last().cloned()
    }

    /// Tokens presented so far
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }
}

#[async_trait]
impl SignalingConnector for FakeConnector {
    async fn connect(&self, _endpoint: &str, auth_token: &str) -> Result<Arc<dyn SignalingChannel>> {
        if auth_token.trim().is_empty() {
            return Err(Error::Connection("Missing auth token".to_string()));
        }
        if let Some(reason) = self.refuse.lock().clone() {
            return Err(Error::Connection(reason));
        }

        self.tokens.lock().push(auth_token.to_string());
        let channel = self.queued.lock().pop_front().unwrap_or_default();
        self.opened.lock().push(Arc::clone(&channel));
        Ok(channel)
    }
}
