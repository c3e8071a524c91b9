//! WebSocket hub client
//!
//! One task per connection owns the socket: it writes queued frames, routes
//! responses to waiting `invoke` calls and broadcasts hub notifications. When
//! the socket drops unexpectedly the same task reconnects with the
//! configured [`ReconnectionPolicy`].

use super::channel::{ChannelEvent, ChannelStatus, SignalingChannel, SignalingConnector};
use super::protocol::{HubEvent, HubRequest, IncomingFrame};
use super::reconnect::ReconnectionPolicy;
use crate::config::RtcConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CAPACITY: usize = 256;

/// Opens [`HubConnection`]s
#[derive(Debug, Clone)]
pub struct HubConnector {
    policy: ReconnectionPolicy,
    connect_timeout: Duration,
    invoke_timeout: Duration,
}

impl HubConnector {
    pub fn new(policy: ReconnectionPolicy, connect_timeout: Duration, invoke_timeout: Duration) -> Self {
        Self {
            policy,
            connect_timeout,
            invoke_timeout,
        }
    }

    pub fn from_config(config: &RtcConfig) -> Self {
        Self::new(
            config.reconnection_policy(),
            config.connect_timeout(),
            config.invoke_timeout(),
        )
    }
}

#[async_trait]
impl SignalingConnector for HubConnector {
    async fn connect(&self, endpoint: &str, auth_token: &str) -> Result<Arc<dyn SignalingChannel>> {
        let connection = HubConnection::connect(
            endpoint,
            auth_token,
            self.policy.clone(),
            self.connect_timeout,
            self.invoke_timeout,
        )
        .await?;
        Ok(Arc::new(connection))
    }
}

type PendingReply = oneshot::Sender<Result<serde_json::Value>>;

/// State shared between the handle and its socket task
struct Shared {
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<HashMap<u64, PendingReply>>,
    next_id: AtomicU64,
    events: broadcast::Sender<ChannelEvent>,
    status: RwLock<ChannelStatus>,
}

impl Shared {
    fn set_status(&self, status: ChannelStatus) {
        *self.status.write() = status;
    }

    fn emit(&self, event: ChannelEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn fail_pending(&self, reason: &str) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, reply) in pending {
            let _ = reply.send(Err(Error::NotConnected(reason.to_string())));
        }
    }

    fn handle_text(&self, text: &str) {
        let frame = match IncomingFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed hub frame: {}", e);
                return;
            }
        };

        match frame {
            IncomingFrame::Response { id, result } => {
                if let Some(reply) = self.pending.lock().remove(&id) {
                    let _ = reply.send(Ok(result));
                } else {
                    debug!("Response for unknown request {}", id);
                }
            }
            IncomingFrame::Error { id, error } => {
                if let Some(reply) = self.pending.lock().remove(&id) {
                    let _ = reply.send(Err(error.into()));
                } else {
                    debug!("Error for unknown request {}: {}", id, error.message);
                }
            }
            IncomingFrame::Notification { method, params } => {
                match HubEvent::from_notification(&method, params) {
                    Ok(event) => {
                        debug!("Hub notification: {}", method);
                        self.emit(ChannelEvent::Hub(event));
                    }
                    Err(e) => warn!("Ignoring hub notification {}: {}", method, e),
                }
            }
        }
    }
}

/// Why a socket session ended
enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// A connected hub client
pub struct HubConnection {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    invoke_timeout: Duration,
}

impl HubConnection {
    /// Connect to the hub at `url`
    ///
    /// # Errors
    ///
    /// `Error::Connection` if `auth_token` is empty, the handshake is rejected,
    /// or it does not complete within `connect_timeout`.
    pub async fn connect(
        url: &str,
        auth_token: &str,
        policy: ReconnectionPolicy,
        connect_timeout: Duration,
        invoke_timeout: Duration,
    ) -> Result<Self> {
        if auth_token.trim().is_empty() {
            return Err(Error::Connection("Missing auth token".to_string()));
        }

        info!("Connecting to signaling hub: {}", url);
        let ws = open_socket(url, auth_token, connect_timeout).await?;
        info!("Connected to signaling hub");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            outgoing: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
            status: RwLock::new(ChannelStatus::Connected),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = tokio::spawn(supervise(
            Arc::clone(&shared),
            Reconnect {
                url: url.to_string(),
                token: auth_token.to_string(),
                policy,
                connect_timeout,
            },
            ws,
            shutdown_rx,
        ));

        Ok(Self {
            shared,
            shutdown,
            supervisor: Mutex::new(Some(supervisor)),
            invoke_timeout,
        })
    }
}

#[async_trait]
impl SignalingChannel for HubConnection {
    async fn invoke(&self, request: HubRequest) -> Result<serde_json::Value> {
        let status = *self.shared.status.read();
        if status != ChannelStatus::Connected {
            return Err(Error::NotConnected(format!("Channel is {:?}", status)));
        }

        let method = request.method();
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&request.into_rpc(id)?)?;

        let sender = self
            .shared
            .outgoing
            .lock()
            .clone()
            .ok_or_else(|| Error::NotConnected("Socket not open".to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, reply_tx);

        debug!("Invoking {} (id {})", method, id);
        if sender.send(Message::Text(text)).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(Error::NotConnected("Socket closed".to_string()));
        }

        match tokio::time::timeout(self.invoke_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected(format!(
                "Connection lost while waiting for {}",
                method
            ))),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(Error::Timeout(format!("No response to {}", method)))
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }

    fn status(&self) -> ChannelStatus {
        *self.shared.status.read()
    }

    async fn disconnect(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            debug!("Disconnecting from signaling hub");
            if let Err(e) = handle.await {
                warn!("Signaling task ended abnormally: {}", e);
            }
        }
        self.shared.set_status(ChannelStatus::Disconnected);
        self.shared.fail_pending("Disconnected");
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
    }
}

struct Reconnect {
    url: String,
    token: String,
    policy: ReconnectionPolicy,
    connect_timeout: Duration,
}

async fn open_socket(url: &str, token: &str, connect_timeout: Duration) -> Result<WsStream> {
    let mut request = url
        .into_client_request()
        .map_err(|e| Error::Connection(format!("Invalid hub URL {}: {}", url, e)))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| Error::Connection(format!("Invalid auth token: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    match tokio::time::timeout(connect_timeout, connect_async(request)).await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(e)) => Err(Error::Connection(format!("Failed to connect: {}", e))),
        Err(_) => Err(Error::Connection(format!(
            "Handshake timed out after {:?}",
            connect_timeout
        ))),
    }
}

/// Own the socket for the connection's lifetime, reconnecting on loss
async fn supervise(
    shared: Arc<Shared>,
    reconnect: Reconnect,
    mut ws: WsStream,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let reason = match run_socket(&shared, ws, &mut shutdown).await {
            SessionEnd::Shutdown => {
                debug!("Signaling socket closed on request");
                return;
            }
            SessionEnd::Lost(reason) => reason,
        };

        warn!("Signaling connection lost: {}", reason);
        shared.set_status(ChannelStatus::Reconnecting);
        shared.fail_pending(&reason);

        let mut attempt = 0;
        ws = loop {
            if !reconnect.policy.should_retry(attempt) {
                error!("Giving up on signaling hub after {} attempts", attempt);
                shared.set_status(ChannelStatus::Disconnected);
                shared.emit(ChannelEvent::Closed { reason });
                return;
            }

            shared.emit(ChannelEvent::Reconnecting {
                attempt: attempt + 1,
            });
            let backoff = reconnect.policy.calculate_backoff(attempt);
            debug!("Reconnect attempt {} in {:?}", attempt + 1, backoff);

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => {
                    shared.set_status(ChannelStatus::Disconnected);
                    return;
                }
            }

            match open_socket(&reconnect.url, &reconnect.token, reconnect.connect_timeout).await {
                Ok(ws) => break ws,
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt + 1, e);
                    attempt += 1;
                }
            }
        };

        info!("Reconnected to signaling hub");
        shared.set_status(ChannelStatus::Connected);
        shared.emit(ChannelEvent::Reconnected);
    }
}

/// Pump one socket until it closes or shutdown is requested
async fn run_socket(
    shared: &Shared,
    ws: WsStream,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    *shared.outgoing.lock() = Some(tx);

    let end = loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(message) = outgoing else {
                    break SessionEnd::Lost("Outgoing queue closed".to_string());
                };
                if let Err(e) = write.send(message).await {
                    break SessionEnd::Lost(format!("Send failed: {}", e));
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => shared.handle_text(&text),
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "Closed by hub".to_string());
                    break SessionEnd::Lost(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break SessionEnd::Lost(format!("Socket error: {}", e)),
                None => break SessionEnd::Lost("Socket ended".to_string()),
            },
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                break SessionEnd::Shutdown;
            }
        }
    };

    shared.outgoing.lock().take();
    end
}
