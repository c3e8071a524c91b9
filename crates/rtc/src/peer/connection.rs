//! Port for the underlying per-peer connection object
//!
//! [`PeerManager`](super::PeerManager) only talks to these traits. The
//! production implementation is [`WebRtcConnectionFactory`](super::WebRtcConnectionFactory);
//! tests substitute in-memory fakes.

use super::negotiation::{ConnectionState, IceCandidate, SessionDescription};
use super::PeerId;
use crate::media::MediaStream;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Called when a remote stream gains a track
pub type RemoteStreamCallback = Arc<dyn Fn(MediaStream) + Send + Sync>;

/// Called for every locally gathered ICE candidate
pub type LocalCandidateCallback = Arc<dyn Fn(IceCandidate) + Send + Sync>;

/// Called on every connection state change
pub type StateChangeCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Event sinks bound to one peer, handed to the factory at creation time
#[derive(Clone)]
pub struct ConnectionEvents {
    pub on_remote_stream: RemoteStreamCallback,
    pub on_local_candidate: LocalCandidateCallback,
    pub on_state_change: StateChangeCallback,
}

impl ConnectionEvents {
    /// Sinks that drop every event
    pub fn noop() -> Self {
        Self {
            on_remote_stream: Arc::new(|_| {}),
            on_local_candidate: Arc::new(|_| {}),
            on_state_change: Arc::new(|_| {}),
        }
    }
}

/// One underlying peer connection
#[async_trait]
pub trait RtcConnection: Send + Sync {
    /// Generate a local offer, apply it as the local description and return its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Generate a local answer to the applied remote offer and return its SDP
    async fn create_answer(&self) -> Result<String>;

    /// Apply a remote offer or answer
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote ICE candidate. Only valid after the remote description.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Send `stream`'s tracks on this connection, replacing earlier ones per kind
    async fn attach_local_stream(&self, stream: &MediaStream) -> Result<()>;

    /// Release network and media handles
    async fn close(&self) -> Result<()>;
}

/// Creates connections for the manager
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(
        &self,
        peer_id: &PeerId,
        events: ConnectionEvents,
    ) -> Result<Arc<dyn RtcConnection>>;
}
