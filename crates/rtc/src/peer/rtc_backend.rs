//! webrtc-rs implementation of the connection port

use super::connection::{ConnectionEvents, ConnectionFactory, RtcConnection};
use super::negotiation::{ConnectionState, IceCandidate, SdpKind, SessionDescription};
use super::PeerId;
use crate::config::RtcConfig;
use crate::media::{MediaSample, MediaStream, MediaTrack, TrackKind};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Builds webrtc-rs peer connections configured with the session's ICE servers
pub struct WebRtcConnectionFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcConnectionFactory {
    pub fn new(config: &RtcConfig) -> Self {
        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        Self { ice_servers }
    }
}

#[async_trait]
impl ConnectionFactory for WebRtcConnectionFactory {
    #[instrument(skip(self, events), fields(peer_id = %peer_id))]
    async fn create(
        &self,
        peer_id: &PeerId,
        events: ConnectionEvents,
    ) -> Result<Arc<dyn RtcConnection>> {
        // One MediaEngine per connection; its negotiated state is not shareable.
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtc(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtc(format!("Failed to create peer connection: {}", e))
        })?);

        let connection = WebRtcConnection {
            peer_id: peer_id.clone(),
            peer_connection,
            senders: Mutex::new(HashMap::new()),
        };
        connection.register_handlers(events);

        info!("Created peer connection for {}", peer_id);
        Ok(Arc::new(connection))
    }
}

/// A local track currently sent on a connection
struct AttachedTrack {
    track_id: String,
    sender: Arc<RTCRtpSender>,
    /// Pumps the track's samples into the RTP sender
    forwarder: JoinHandle<()>,
}

impl Drop for AttachedTrack {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Write every sample pushed to `track` onto `local` until the track stops.
fn forward_samples(
    peer_id: PeerId,
    track: MediaTrack,
    local: Arc<TrackLocalStaticSample>,
) -> JoinHandle<()> {
    let samples = track.subscribe_samples();
    tokio::spawn(async move {
        let Some(mut samples) = samples else {
            return;
        };
        let mut written = 0u64;
        loop {
            match samples.recv().await {
                Ok(sample) => {
                    if !track.is_enabled() {
                        continue;
                    }
                    let sample = Sample {
                        data: sample.data,
                        duration: sample.duration,
                        timestamp: SystemTime::now(),
                        ..Default::default()
                    };
                    if let Err(e) = local.write_sample(&sample).await {
                        debug!("Failed to write {} sample to {}: {}", track.kind(), peer_id, e);
                    } else {
                        written += 1;
                        if written == 1 {
                            debug!("First {} sample sent to {}", track.kind(), peer_id);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Skipped {} {} samples for {}", skipped, track.kind(), peer_id);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("{} track {} ended after {} samples to {}", track.kind(), track.id(), written, peer_id);
    })
}

/// Hand the RTP payloads of `track` to `remote` until either side ends.
async fn receive_samples(track: Arc<TrackRemote>, remote: MediaTrack) {
    while remote.is_live() {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                remote.push_sample(MediaSample::new(packet.payload, Duration::ZERO));
            }
            Err(e) => {
                debug!("Remote track {} finished: {}", remote.id(), e);
                break;
            }
        }
    }
    remote.stop();
}

/// webrtc-rs peer connection wrapper
pub struct WebRtcConnection {
    peer_id: PeerId,
    peer_connection: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackKind, AttachedTrack>>,
}

impl WebRtcConnection {
    fn register_handlers(&self, events: ConnectionEvents) {
        let peer_id = self.peer_id.clone();
        let on_state_change = events.on_state_change.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = match s {
                    RTCPeerConnectionState::New => Some(ConnectionState::New),
                    RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
                    RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
                    RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
                    RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
                    RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
                    _ => None,
                };
                if let Some(state) = state {
                    debug!("Peer {} connection state: {:?}", peer_id, state);
                    on_state_change(state);
                }
                Box::pin(async {})
            }));

        let peer_id = self.peer_id.clone();
        let on_local_candidate = events.on_local_candidate.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                // `None` marks the end of gathering
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => on_local_candidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }),
                        Err(e) => warn!("Failed to serialize ICE candidate for {}: {}", peer_id, e),
                    }
                }
                Box::pin(async {})
            }));

        let peer_id = self.peer_id.clone();
        let on_remote_stream = events.on_remote_stream;
        let remote_streams: Arc<parking_lot::Mutex<HashMap<String, MediaStream>>> =
            Arc::new(parking_lot::Mutex::new(HashMap::new()));
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => Some(TrackKind::Audio),
                    RTPCodecType::Video => Some(TrackKind::Video),
                    _ => None,
                };

                if let Some(kind) = kind {
                    let stream = remote_streams
                        .lock()
                        .entry(track.stream_id())
                        .or_insert_with_key(|id| MediaStream::with_id(id.clone(), Vec::new()))
                        .clone();

                    let remote = MediaTrack::with_id(
                        track.id(),
                        kind,
                        format!("{} {}", peer_id, kind),
                        None,
                    );

                    if stream.add_track(remote.clone()) {
                        info!("Remote {} track from {} on stream {}", kind, peer_id, stream.id());
                        on_remote_stream(stream);
                        tokio::spawn(receive_samples(track, remote));
                    }
                }
                Box::pin(async {})
            },
        ));
    }

    async fn local_sdp(&self) -> Result<String> {
        self.peer_connection
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| Error::negotiation(&self.peer_id, "No local description"))
    }

    fn sample_track(stream: &MediaStream, track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
        let capability = match track.kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        };

        Arc::new(TrackLocalStaticSample::new(
            capability,
            track.id().to_string(),
            stream.id().to_string(),
        ))
    }
}

#[async_trait]
impl RtcConnection for WebRtcConnection {
    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::negotiation(&self.peer_id, format!("create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| {
                Error::negotiation(&self.peer_id, format!("set local description: {}", e))
            })?;

        debug!("Created SDP offer for peer {}", self.peer_id);
        self.local_sdp().await
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::negotiation(&self.peer_id, format!("create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| {
                Error::negotiation(&self.peer_id, format!("set local description: {}", e))
            })?;

        debug!("Created SDP answer for peer {}", self.peer_id);
        self.local_sdp().await
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let parsed = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| Error::negotiation(&self.peer_id, format!("parse SDP: {}", e)))?;

        self.peer_connection
            .set_remote_description(parsed)
            .await
            .map_err(|e| {
                Error::negotiation(&self.peer_id, format!("set remote description: {}", e))
            })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::negotiation(&self.peer_id, format!("add ICE candidate: {}", e)))
    }

    async fn attach_local_stream(&self, stream: &MediaStream) -> Result<()> {
        let mut senders = self.senders.lock().await;

        for kind in [TrackKind::Audio, TrackKind::Video] {
            let wanted = stream.tracks_of(kind).into_iter().find(|t| t.is_live());
            let current = senders
                .get(&kind)
                .map(|a| (a.track_id.clone(), Arc::clone(&a.sender)));

            match (wanted, current) {
                (Some(track), Some((track_id, _))) if track_id == track.id() => {}
                (Some(track), Some((_, sender))) => {
                    let local = Self::sample_track(stream, &track);
                    sender
                        .replace_track(Some(
                            Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>
                        ))
                        .await
                        .map_err(|e| {
                            Error::WebRtc(format!("Failed to replace {} track: {}", kind, e))
                        })?;
                    senders.insert(
                        kind,
                        AttachedTrack {
                            track_id: track.id().to_string(),
                            sender,
                            forwarder: forward_samples(self.peer_id.clone(), track, local),
                        },
                    );
                }
                (Some(track), None) => {
                    let local = Self::sample_track(stream, &track);
                    let sender = self
                        .peer_connection
                        .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
                        .await
                        .map_err(|e| {
                            Error::WebRtc(format!("Failed to add {} track: {}", kind, e))
                        })?;
                    senders.insert(
                        kind,
                        AttachedTrack {
                            track_id: track.id().to_string(),
                            sender,
                            forwarder: forward_samples(self.peer_id.clone(), track, local),
                        },
                    );
                }
                (None, Some((_, sender))) => {
                    senders.remove(&kind);
                    sender.replace_track(None).await.map_err(|e| {
                        Error::WebRtc(format!("Failed to detach {} track: {}", kind, e))
                    })?;
                }
                (None, None) => {}
            }
        }

        debug!("Attached local stream {} to peer {}", stream.id(), self.peer_id);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection for peer {}", self.peer_id);
        self.senders.lock().await.clear();
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to close connection: {}", e)))
    }
}
