//! Signaling channel port
//!
//! Sessions hold an `Arc<dyn SignalingChannel>` obtained from a
//! [`SignalingConnector`]. [`HubConnector`](super::HubConnector) is the
//! WebSocket implementation.

use super::protocol::{HubEvent, HubRequest};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Something a subscriber sees on the channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Notification pushed by the hub
    Hub(HubEvent),
    /// The socket dropped; reconnect attempt `attempt` (1-based) is scheduled
    Reconnecting { attempt: u32 },
    /// The socket is back; requests work again
    Reconnected,
    /// Reconnection gave up; the channel is dead
    Closed { reason: String },
}

/// Liveness of the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connected,
    Reconnecting,
    Disconnected,
}

/// A live, auto-reconnecting connection to the signaling hub
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send a request and wait for the hub's response.
    ///
    /// Fails with `NotConnected` while the channel is reconnecting or closed.
    async fn invoke(&self, request: HubRequest) -> Result<serde_json::Value>;

    /// Receive every event emitted after this call
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;

    fn status(&self) -> ChannelStatus;

    /// Close the socket and stop reconnecting. Idempotent.
    async fn disconnect(&self);
}

/// Opens signaling channels
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Connect to `endpoint` presenting `auth_token` as a bearer credential.
    ///
    /// Fails with `Error::Connection` when the token is empty or the handshake
    /// does not complete.
    async fn connect(&self, endpoint: &str, auth_token: &str) -> Result<Arc<dyn SignalingChannel>>;
}
