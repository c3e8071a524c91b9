//! Plumbing shared by call and room sessions

use crate::config::RtcConfig;
use crate::media::{LocalMedia, MediaConstraints, MediaStream, MediaTrack, TrackKind};
use crate::peer::{
    ConnectionFactory, ConnectionState, IceCandidate, PeerCallbacks, PeerId, PeerManager,
    WebRtcConnectionFactory,
};
use crate::ports::{MediaDevices, PeerDirectory, TokenProvider};
use crate::signaling::{
    ChannelStatus, HubConnector, HubRequest, SignalingChannel, SignalingConnector,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Everything a session needs from the outside world
#[derive(Clone)]
pub struct Collaborators {
    pub connector: Arc<dyn SignalingConnector>,
    pub tokens: Arc<dyn TokenProvider>,
    pub connections: Arc<dyn ConnectionFactory>,
    pub devices: Arc<dyn MediaDevices>,
    pub directory: Option<Arc<dyn PeerDirectory>>,
}

impl Collaborators {
    /// WebSocket hub + webrtc-rs connections
    pub fn webrtc(
        config: &RtcConfig,
        tokens: Arc<dyn TokenProvider>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        Self {
            connector: Arc::new(HubConnector::from_config(config)),
            tokens,
            connections: Arc::new(WebRtcConnectionFactory::new(config)),
            devices,
            directory: None,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn PeerDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Display name for `peer`, falling back to `fallback` then the id itself
    pub(crate) fn display_name(&self, peer: &PeerId, fallback: Option<&str>) -> String {
        self.directory
            .as_ref()
            .and_then(|d| d.resolve(peer))
            .map(|p| p.display_name)
            .or_else(|| fallback.map(str::to_string))
            .unwrap_or_else(|| peer.to_string())
    }

    pub(crate) fn avatar_url(&self, peer: &PeerId) -> Option<String> {
        self.directory
            .as_ref()
            .and_then(|d| d.resolve(peer))
            .and_then(|p| p.avatar_url)
    }

    /// Open the signaling channel. A missing token fails before any I/O.
    pub(crate) async fn open_channel(&self, config: &RtcConfig) -> Result<Arc<dyn SignalingChannel>> {
        let token = self
            .tokens
            .token()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Connection("No session token available".to_string()))?;
        self.connector.connect(&config.signaling_url, &token).await
    }
}

/// Signaling health as shown to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalingHealth {
    Online,
    /// Socket dropped; peer connections are kept
    Reconnecting,
    #[default]
    Offline,
}

impl From<ChannelStatus> for SignalingHealth {
    fn from(status: ChannelStatus) -> Self {
        match status {
            ChannelStatus::Connected => SignalingHealth::Online,
            ChannelStatus::Reconnecting => SignalingHealth::Reconnecting,
            ChannelStatus::Disconnected => SignalingHealth::Offline,
        }
    }
}

/// Peer manager callbacks, funneled into the session driver
#[derive(Debug)]
pub(crate) enum PeerSignal {
    RemoteStream(PeerId, MediaStream),
    LocalCandidate(PeerId, IceCandidate),
    State(PeerId, ConnectionState),
}

fn peer_callbacks(tx: mpsc::UnboundedSender<PeerSignal>) -> PeerCallbacks {
    let stream_tx = tx.clone();
    let candidate_tx = tx.clone();
    PeerCallbacks {
        on_remote_stream: Arc::new(move |peer, stream| {
            let _ = stream_tx.send(PeerSignal::RemoteStream(peer, stream));
        }),
        on_local_candidate: Arc::new(move |peer, candidate| {
            let _ = candidate_tx.send(PeerSignal::LocalCandidate(peer, candidate));
        }),
        on_connection_state: Arc::new(move |peer, state| {
            let _ = tx.send(PeerSignal::State(peer, state));
        }),
    }
}

/// Build a peer manager whose callbacks feed a fresh signal queue
pub(crate) fn peer_manager(
    connections: Arc<dyn ConnectionFactory>,
    max_peers: usize,
) -> Result<(Arc<PeerManager>, mpsc::UnboundedReceiver<PeerSignal>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = PeerManager::new(connections, peer_callbacks(tx), max_peers)?;
    Ok((Arc::new(manager), rx))
}

/// Fire-and-forget hub requests, sent one at a time in queue order
pub(crate) struct Outbox {
    tx: mpsc::UnboundedSender<HubRequest>,
    task: JoinHandle<()>,
}

impl Outbox {
    pub(crate) fn spawn(channel: Arc<dyn SignalingChannel>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<HubRequest>();
        let task = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let method = request.method();
                if let Err(e) = channel.invoke(request).await {
                    warn!("Hub request {} failed: {}", method, e);
                }
            }
            debug!("Outbox closed");
        });
        Self { tx, task }
    }

    pub(crate) fn send(&self, request: HubRequest) {
        if self.tx.send(request).is_err() {
            warn!("Outbox stopped, dropping request");
        }
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Swap the `kind` track of the local stream for one from `device_id`.
///
/// The enabled flag carries over, the old track is stopped, and every
/// connection picks up the new track.
pub(crate) async fn switch_track(
    devices: &dyn MediaDevices,
    peers: Option<&PeerManager>,
    local: &mut LocalMedia,
    kind: TrackKind,
    device_id: &str,
) -> Result<MediaTrack> {
    let stream = local
        .stream
        .clone()
        .ok_or_else(|| Error::InvalidState("No local media to switch".to_string()))?;
    if !stream.has_kind(kind) {
        return Err(Error::InvalidState(format!("Local media has no {} track", kind)));
    }

    let acquired = devices
        .acquire(&MediaConstraints::single(kind, device_id))
        .await?;
    let Some(track) = acquired.tracks_of(kind).into_iter().next() else {
        acquired.stop();
        return Err(Error::MediaAcquisition(format!("Device {} returned no {} track", device_id, kind)));
    };
    for extra in acquired.tracks().iter().filter(|t| !t.ptr_eq(&track)) {
        extra.stop();
    }

    let enabled = match kind {
        TrackKind::Audio => local.audio_enabled,
        TrackKind::Video => local.video_enabled,
    };
    track.set_enabled(enabled);

    for old in stream.replace_kind(track.clone()) {
        old.stop();
    }

    if let Some(peers) = peers {
        peers.set_local_stream(stream).await;
    }
    debug!("Switched {} to device {}", kind, device_id);
    Ok(track)
}
