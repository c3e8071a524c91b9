//! Multi-party room state machine (full mesh)
//!
//! Every participant holds one peer connection to every other participant.
//! The session owns the signaling channel, the peer manager and the local
//! media for the room it is in; joining another room disposes all three
//! first.

use super::state::{Participant, RoomNotice, RoomState, RoomStatus, ViewMode};
use crate::config::RtcConfig;
use crate::media::{LocalMedia, MediaConstraints, TrackKind};
use crate::peer::{ConnectionState, PeerId, PeerManager};
use crate::session::{self, Collaborators, Outbox, PeerSignal, SignalingHealth};
use crate::signaling::{
    ChannelEvent, ChannelStatus, HubEvent, HubRequest, JoinRoomResponse, ParticipantRole,
    SignalingChannel,
};
use crate::{Error, Result};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const NOTICE_CAPACITY: usize = 64;

/// Resources bound to the room we are in
struct RoomLink {
    room_id: String,
    self_id: PeerId,
    channel: Arc<dyn SignalingChannel>,
    peers: Arc<PeerManager>,
    outbox: Outbox,
    driver: JoinHandle<()>,
}

#[derive(Default)]
struct RoomCore {
    link: Option<RoomLink>,
    local: LocalMedia,
    /// Bumped on every join attempt and teardown
    epoch: u64,
}

struct RoomInner {
    config: RtcConfig,
    collab: Collaborators,
    core: Mutex<RoomCore>,
    state: watch::Sender<RoomState>,
    notices: broadcast::Sender<RoomNotice>,
}

/// Coordinates one room at a time
pub struct RoomSession {
    inner: Arc<RoomInner>,
}

impl RoomSession {
    pub fn new(config: RtcConfig, collab: Collaborators) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(RoomState::default());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Ok(Self {
            inner: Arc::new(RoomInner {
                config,
                collab,
                core: Mutex::new(RoomCore::default()),
                state,
                notices,
            }),
        })
    }

    pub fn state(&self) -> RoomState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RoomState> {
        self.inner.state.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<RoomNotice> {
        self.inner.notices.subscribe()
    }

    /// Join `room_id` as `display_name`
    ///
    /// Leaves any room we are in, acquires camera and microphone, connects
    /// to the hub and joins. Participants from the roster are listed without
    /// streams; media flows after [`start_call`](Self::start_call) or when
    /// others call us.
    ///
    /// # Errors
    ///
    /// `MediaAcquisition`, `Connection` (no token, hub unreachable) or a hub
    /// `Signaling` error. The session is back to `Disconnected` afterwards.
    #[instrument(skip(self))]
    pub async fn connect_to_room(&self, room_id: &str, display_name: &str) -> Result<()> {
        let inner = &self.inner;

        let epoch = {
            let mut core = inner.core.lock().await;
            if core.link.is_some() {
                info!("Leaving previous room before joining {}", room_id);
                if let Some(driver) = inner.teardown(&mut core, RoomStatus::Left, None, true).await {
                    driver.abort();
                }
            }
            core.local.release();
            core.epoch += 1;
            let view_mode = inner.state.borrow().view_mode;
            inner.state.send_replace(RoomState {
                status: RoomStatus::Connecting,
                room_id: Some(room_id.to_string()),
                display_name: display_name.to_string(),
                view_mode,
                ..Default::default()
            });
            core.epoch
        };

        let stream = match inner
            .collab
            .devices
            .acquire(&MediaConstraints::call(true))
            .await
        {
            Ok(stream) => stream,
            Err(e) => return Err(inner.abort_connect(epoch, e).await),
        };

        let channel = match inner.collab.open_channel(&inner.config).await {
            Ok(channel) => channel,
            Err(e) => {
                stream.stop();
                return Err(inner.abort_connect(epoch, e).await);
            }
        };
        let events = channel.subscribe();

        let joined = async {
            let value = channel
                .invoke(HubRequest::JoinRoom {
                    room_id: room_id.to_string(),
                    display_name: display_name.to_string(),
                })
                .await?;
            let joined: JoinRoomResponse = serde_json::from_value(value)?;
            let peers = session::peer_manager(
                Arc::clone(&inner.collab.connections),
                inner.config.max_peers as usize,
            )?;
            Ok::<_, Error>((joined, peers))
        }
        .await;

        let (joined, (peers, signals)) = match joined {
            Ok(joined) => joined,
            Err(e) => {
                channel.disconnect().await;
                stream.stop();
                return Err(inner.abort_connect(epoch, e).await);
            }
        };

        let mut core = inner.core.lock().await;
        if core.epoch != epoch {
            channel.disconnect().await;
            stream.stop();
            return Err(Error::InvalidState(
                "Left the room while joining".to_string(),
            ));
        }

        peers.set_local_stream(stream.clone()).await;
        core.local.attach(stream.clone());

        let participants = joined
            .participants
            .iter()
            .filter(|entry| entry.peer_id != joined.peer_id)
            .map(|entry| {
                let mut participant = Participant::new(
                    entry.peer_id.clone(),
                    inner
                        .collab
                        .display_name(&entry.peer_id, Some(&entry.display_name)),
                    entry.role,
                );
                participant.avatar_url = inner.collab.avatar_url(&entry.peer_id);
                participant.is_muted = entry.is_muted;
                participant.is_camera_off = entry.is_camera_off;
                participant.is_hand_raised = entry.is_hand_raised;
                (entry.peer_id.clone(), participant)
            })
            .collect();

        let is_host = joined.role == ParticipantRole::Host;
        let signaling = SignalingHealth::from(channel.status());
        let (mic, camera) = (core.local.audio_enabled, core.local.video_enabled);
        inner.state.send_modify(|s| {
            s.status = RoomStatus::Connected;
            s.self_id = Some(joined.peer_id.clone());
            s.is_host = is_host;
            s.participants = participants;
            s.local_stream = Some(stream.clone());
            s.mic_enabled = mic;
            s.camera_enabled = camera;
            s.signaling = signaling;
        });

        let driver = tokio::spawn(drive(Arc::downgrade(inner), epoch, events, signals));
        core.link = Some(RoomLink {
            room_id: room_id.to_string(),
            self_id: joined.peer_id.clone(),
            outbox: Outbox::spawn(Arc::clone(&channel)),
            channel,
            peers,
            driver,
        });

        info!(
            "Joined room {} as {} ({} others)",
            room_id,
            joined.peer_id,
            joined.participants.len()
        );
        inner.notify(RoomNotice::Joined {
            room_id: room_id.to_string(),
            self_id: joined.peer_id,
            is_host,
        });
        Ok(())
    }

    /// Offer to every participant we have no connection with yet.
    ///
    /// Returns the number of offers sent.
    #[instrument(skip(self))]
    pub async fn start_call(&self) -> Result<usize> {
        let inner = &self.inner;
        let core = inner.core.lock().await;
        let link = core
            .link
            .as_ref()
            .ok_or_else(|| Error::NotConnected("Not in a room".to_string()))?;
        if link.channel.status() != ChannelStatus::Connected {
            return Err(Error::NotConnected(
                "Signaling hub is not connected".to_string(),
            ));
        }

        let known: Vec<PeerId> = inner
            .state
            .borrow()
            .participants
            .keys()
            .filter(|id| **id != link.self_id)
            .cloned()
            .collect();

        let mut offered = 0;
        for peer_id in known {
            if link.peers.has_peer(&peer_id).await {
                continue;
            }
            match link.peers.create_offer(&peer_id).await {
                Ok(sdp) => {
                    link.outbox.send(HubRequest::SendOffer {
                        to: peer_id,
                        sdp,
                    });
                    offered += 1;
                }
                Err(Error::InvalidState(reason)) => {
                    warn!("Not offering to {}: {}", peer_id, reason);
                }
                Err(e) => inner.drop_participant(&peer_id, e.to_string()),
            }
        }

        inner.mark_active();
        info!("Sent {} offers in room {}", offered, link.room_id);
        Ok(offered)
    }

    /// Leave the room: tell the hub, close every connection, stop local
    /// media and close the signaling channel.
    pub async fn disconnect_from_room(&self) {
        let inner = &self.inner;
        let mut core = inner.core.lock().await;
        let status = inner.state.borrow().status;

        if core.link.is_none() && status != RoomStatus::Connecting {
            core.local.release();
            debug!("Not in a room");
            return;
        }

        if let Some(driver) = inner.teardown(&mut core, RoomStatus::Left, None, true).await {
            driver.abort();
        }
        info!("Left room");
        inner.notify(RoomNotice::Left);
    }

    /// Close the room for everyone. Host only.
    pub async fn end_room(&self) -> Result<()> {
        let inner = &self.inner;
        let mut core = inner.core.lock().await;
        let link = core
            .link
            .as_ref()
            .ok_or_else(|| Error::NotConnected("Not in a room".to_string()))?;
        if !inner.state.borrow().is_host {
            return Err(Error::InvalidState(
                "Only the host can end the room".to_string(),
            ));
        }

        link.channel
            .invoke(HubRequest::EndRoom {
                room_id: link.room_id.clone(),
            })
            .await?;

        let reason = Some("Ended by host".to_string());
        if let Some(driver) = inner
            .teardown(&mut core, RoomStatus::Ended, reason.clone(), false)
            .await
        {
            driver.abort();
        }
        inner.notify(RoomNotice::RoomEnded { reason });
        Ok(())
    }

    /// Mute/unmute. `None` when there is no local media.
    pub async fn toggle_mic(&self) -> Option<bool> {
        self.inner.toggle_media(TrackKind::Audio).await
    }

    /// Camera on/off. `None` when there is no local media.
    pub async fn toggle_camera(&self) -> Option<bool> {
        self.inner.toggle_media(TrackKind::Video).await
    }

    /// Raise or lower our hand. `None` when not in a room.
    pub async fn toggle_hand(&self) -> Option<bool> {
        let inner = &self.inner;
        let core = inner.core.lock().await;
        let link = core.link.as_ref()?;
        let raised = !inner.state.borrow().hand_raised;
        inner.state.send_modify(|s| s.hand_raised = raised);
        link.outbox.send(HubRequest::RaiseHand {
            room_id: link.room_id.clone(),
            raised,
        });
        Some(raised)
    }

    pub fn toggle_view_mode(&self) -> ViewMode {
        let mut mode = ViewMode::default();
        self.inner.state.send_modify(|s| {
            s.view_mode = s.view_mode.toggled();
            mode = s.view_mode;
        });
        mode
    }

    pub fn toggle_chat(&self) -> bool {
        let mut shown = false;
        self.inner.state.send_modify(|s| {
            s.show_chat = !s.show_chat;
            shown = s.show_chat;
        });
        shown
    }

    pub fn toggle_participants(&self) -> bool {
        let mut shown = false;
        self.inner.state.send_modify(|s| {
            s.show_participants = !s.show_participants;
            shown = s.show_participants;
        });
        shown
    }

    /// Move the `kind` track to another capture device
    pub async fn switch_device(&self, kind: TrackKind, device_id: &str) -> Result<()> {
        let inner = &self.inner;
        let mut core = inner.core.lock().await;
        let peers = core.link.as_ref().map(|link| Arc::clone(&link.peers));
        session::switch_track(
            inner.collab.devices.as_ref(),
            peers.as_deref(),
            &mut core.local,
            kind,
            device_id,
        )
        .await?;
        let stream = core.local.stream.clone();
        inner.state.send_modify(|s| s.local_stream = stream);
        Ok(())
    }
}

impl Drop for RoomCore {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.driver.abort();
        }
    }
}

/// Dropping the session leaves the room: local tracks stop right away, the
/// connections and the channel close on a spawned task.
impl Drop for RoomSession {
    fn drop(&mut self) {
        if let Ok(mut core) = self.inner.core.try_lock() {
            if let Some(link) = core.link.as_ref() {
                link.driver.abort();
            }
            core.local.release();
        }

        let inner = Arc::clone(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { inner.shutdown().await });
            }
            Err(_) => warn!("Room session dropped outside a runtime, connections not closed"),
        }
    }
}

impl RoomInner {
    fn notify(&self, notice: RoomNotice) {
        let _ = self.notices.send(notice);
    }

    async fn abort_connect(&self, epoch: u64, error: Error) -> Error {
        let core = self.core.lock().await;
        if core.epoch == epoch {
            warn!("Could not join room: {}", error);
            self.state.send_modify(|s| {
                s.status = RoomStatus::Disconnected;
                s.room_id = None;
            });
        }
        error
    }

    /// Release everything bound to the room and publish `status`.
    ///
    /// Returns the driver handle; callers other than the driver abort it.
    async fn shutdown(&self) {
        let mut core = self.core.lock().await;
        if core.link.is_none() {
            core.local.release();
            return;
        }
        if let Some(driver) = self.teardown(&mut core, RoomStatus::Left, None, true).await {
            driver.abort();
        }
        info!("Left room on drop");
    }

    async fn teardown(
        &self,
        core: &mut RoomCore,
        status: RoomStatus,
        reason: Option<String>,
        notify_hub: bool,
    ) -> Option<JoinHandle<()>> {
        core.epoch += 1;

        let driver = match core.link.take() {
            Some(link) => {
                if notify_hub {
                    if let Err(e) = link
                        .channel
                        .invoke(HubRequest::LeaveRoom {
                            room_id: link.room_id.clone(),
                        })
                        .await
                    {
                        warn!("Could not notify hub of leave: {}", e);
                    }
                }
                link.peers.close_all().await;
                link.peers.clear_local_stream();
                link.channel.disconnect().await;
                Some(link.driver)
            }
            None => None,
        };

        let stopped = core.local.release();
        debug!("Room torn down ({:?}), stopped {} tracks", status, stopped);

        self.state.send_modify(|s| {
            s.status = status;
            s.participants.clear();
            s.local_stream = None;
            s.mic_enabled = false;
            s.camera_enabled = false;
            s.hand_raised = false;
            s.is_host = false;
            s.signaling = SignalingHealth::Offline;
            s.end_reason = reason;
        });
        driver
    }

    fn mark_active(&self) {
        self.state.send_if_modified(|s| {
            if s.status == RoomStatus::Connected {
                s.status = RoomStatus::Active;
                true
            } else {
                false
            }
        });
    }

    /// Add a participant first seen through signaling
    fn ensure_participant(&self, peer_id: &PeerId, name: Option<&str>, role: ParticipantRole) {
        let mut added = None;
        self.state.send_if_modified(|s| {
            if s.participants.contains_key(peer_id) {
                return false;
            }
            let mut participant =
                Participant::new(peer_id.clone(), self.collab.display_name(peer_id, name), role);
            participant.avatar_url = self.collab.avatar_url(peer_id);
            added = Some(participant.display_name.clone());
            s.participants.insert(peer_id.clone(), participant);
            true
        });
        if let Some(display_name) = added {
            self.notify(RoomNotice::ParticipantJoined {
                peer_id: peer_id.clone(),
                display_name,
            });
        }
    }

    /// Remove a participant whose negotiation failed; its entry is already gone
    fn drop_participant(&self, peer_id: &PeerId, reason: String) {
        warn!("Dropping participant {}: {}", peer_id, reason);
        self.state.send_modify(|s| {
            s.participants.remove(peer_id);
        });
        self.notify(RoomNotice::PeerFailed {
            peer_id: peer_id.clone(),
            reason,
        });
    }

    async fn toggle_media(&self, kind: TrackKind) -> Option<bool> {
        let mut core = self.core.lock().await;
        let enabled = core.local.toggle(kind)?;
        let (mic, camera) = (core.local.audio_enabled, core.local.video_enabled);
        self.state.send_modify(|s| {
            s.mic_enabled = mic;
            s.camera_enabled = camera;
        });
        if let Some(link) = core.link.as_ref() {
            link.outbox.send(HubRequest::MediaState {
                room_id: link.room_id.clone(),
                is_muted: !mic,
                is_camera_off: !camera,
            });
        }
        Some(enabled)
    }

    /// Returns `false` once the driver should stop
    async fn on_channel_event(&self, epoch: u64, event: ChannelEvent) -> bool {
        let mut core = self.core.lock().await;
        if core.epoch != epoch || core.link.is_none() {
            return false;
        }

        match event {
            ChannelEvent::Hub(event) => self.on_hub_event(&mut core, event).await,
            ChannelEvent::Reconnecting { attempt } => {
                info!("Signaling reconnecting (attempt {})", attempt);
                self.state
                    .send_modify(|s| s.signaling = SignalingHealth::Reconnecting);
                if attempt == 1 {
                    self.notify(RoomNotice::SignalingDegraded);
                }
                true
            }
            ChannelEvent::Reconnected => {
                self.state
                    .send_modify(|s| s.signaling = SignalingHealth::Online);
                self.notify(RoomNotice::SignalingRestored);
                true
            }
            ChannelEvent::Closed { reason } => {
                let reason = Some(format!("Signaling connection lost: {}", reason));
                self.teardown(&mut core, RoomStatus::Ended, reason.clone(), false)
                    .await;
                self.notify(RoomNotice::RoomEnded { reason });
                false
            }
        }
    }

    async fn on_hub_event(&self, core: &mut RoomCore, event: HubEvent) -> bool {
        if let HubEvent::RoomEnded { reason } = event {
            info!("Room ended: {:?}", reason);
            self.teardown(core, RoomStatus::Ended, reason.clone(), false)
                .await;
            self.notify(RoomNotice::RoomEnded { reason });
            return false;
        }

        let Some(link) = core.link.as_ref() else {
            return false;
        };

        match event {
            HubEvent::RoleAssigned { peer_id, role } => {
                if peer_id == link.self_id {
                    let is_host = role == ParticipantRole::Host;
                    let changed = self.state.send_if_modified(|s| {
                        let changed = s.is_host != is_host;
                        s.is_host = is_host;
                        changed
                    });
                    if changed {
                        info!("Own role is now {:?}", role);
                        self.notify(RoomNotice::RoleChanged { is_host });
                    }
                } else {
                    self.state.send_if_modified(|s| match s.participants.get_mut(&peer_id) {
                        Some(p) if p.role != role => {
                            p.role = role;
                            true
                        }
                        _ => false,
                    });
                }
            }

            HubEvent::UserJoined {
                peer_id,
                display_name,
                role,
            } => {
                if peer_id != link.self_id {
                    info!("{} joined the room", peer_id);
                    self.ensure_participant(&peer_id, Some(&display_name), role);
                }
            }

            HubEvent::UserLeft { peer_id } => {
                // One snapshot drops the participant before its connection closes
                let removed = self.state.send_if_modified(|s| s.participants.remove(&peer_id).is_some());
                link.peers.close_peer_connection(&peer_id).await;
                if removed {
                    info!("{} left the room", peer_id);
                    self.notify(RoomNotice::ParticipantLeft { peer_id });
                }
            }

            HubEvent::OfferReceived { from, sdp } => {
                if from == link.self_id {
                    return true;
                }
                self.ensure_participant(&from, None, ParticipantRole::Participant);

                if link.peers.is_awaiting_answer(&from).await {
                    // Both sides offered: the smaller id's offer wins
                    if link.self_id < from {
                        info!("Glare with {}: keeping our offer", from);
                        return true;
                    }
                    info!("Glare with {}: answering their offer", from);
                    link.peers.discard_local_offer(&from).await;
                }

                match link.peers.handle_offer(&from, sdp).await {
                    Ok(answer) => {
                        link.outbox.send(HubRequest::SendAnswer {
                            to: from,
                            sdp: answer,
                        });
                        self.mark_active();
                    }
                    Err(e) => self.drop_participant(&from, e.to_string()),
                }
            }

            HubEvent::AnswerReceived { from, sdp } => {
                match link.peers.handle_answer(&from, sdp).await {
                    Ok(()) => self.mark_active(),
                    Err(e) => self.drop_participant(&from, e.to_string()),
                }
            }

            HubEvent::IceCandidateReceived { from, candidate } => {
                if let Err(e) = link.peers.add_ice_candidate(&from, candidate).await {
                    warn!("Remote ICE candidate from {} rejected: {}", from, e);
                }
            }

            HubEvent::ParticipantMediaChanged {
                peer_id,
                is_muted,
                is_camera_off,
            } => {
                self.state.send_if_modified(|s| match s.participants.get_mut(&peer_id) {
                    Some(p) => {
                        p.is_muted = is_muted;
                        p.is_camera_off = is_camera_off;
                        true
                    }
                    None => false,
                });
            }

            HubEvent::HandChanged { peer_id, raised } => {
                if peer_id == link.self_id {
                    self.state.send_modify(|s| s.hand_raised = raised);
                } else {
                    self.state.send_if_modified(|s| match s.participants.get_mut(&peer_id) {
                        Some(p) => {
                            p.is_hand_raised = raised;
                            true
                        }
                        None => false,
                    });
                }
            }

            other => debug!("Room session ignoring {:?}", other),
        }
        true
    }

    async fn on_peer_signal(&self, epoch: u64, signal: PeerSignal) -> bool {
        let core = self.core.lock().await;
        if core.epoch != epoch {
            return false;
        }
        let Some(link) = core.link.as_ref() else {
            return false;
        };

        match signal {
            PeerSignal::LocalCandidate(peer_id, candidate) => {
                link.outbox.send(HubRequest::SendIceCandidate {
                    to: peer_id,
                    candidate,
                });
            }
            PeerSignal::RemoteStream(peer_id, stream) => {
                let attached = self.state.send_if_modified(|s| match s.participants.get_mut(&peer_id) {
                    Some(p) => {
                        p.remote_stream = Some(stream);
                        true
                    }
                    None => false,
                });
                if !attached {
                    debug!("Stream from unknown participant {}", peer_id);
                }
            }
            PeerSignal::State(peer_id, state) => {
                self.state.send_if_modified(|s| match s.participants.get_mut(&peer_id) {
                    Some(p) => {
                        p.connection = Some(state);
                        if state == ConnectionState::Failed {
                            p.remote_stream = None;
                        }
                        true
                    }
                    None => false,
                });
                if state == ConnectionState::Failed {
                    link.peers.close_peer_connection(&peer_id).await;
                    self.notify(RoomNotice::PeerFailed {
                        peer_id,
                        reason: "Peer connection failed".to_string(),
                    });
                }
            }
        }
        true
    }
}

async fn drive(
    inner: Weak<RoomInner>,
    epoch: u64,
    mut events: broadcast::Receiver<ChannelEvent>,
    mut signals: mpsc::UnboundedReceiver<PeerSignal>,
) {
    loop {
        let keep_going = tokio::select! {
            event = events.recv() => match event {
                Ok(event) => match inner.upgrade() {
                    Some(inner) => inner.on_channel_event(epoch, event).await,
                    None => false,
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Room driver skipped {} signaling events", skipped);
                    true
                }
                Err(RecvError::Closed) => false,
            },
            Some(signal) = signals.recv() => match inner.upgrade() {
                Some(inner) => inner.on_peer_signal(epoch, signal).await,
                None => false,
            },
            else => false,
        };
        if !keep_going {
            break;
        }
    }
    debug!("Room driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SilentMediaDevices;
    use crate::ports::StaticToken;
    use crate::testing::{FakeConnectionFactory, FakeConnector};

    fn session(connector: Arc<FakeConnector>, token: &str) -> RoomSession {
        RoomSession::new(
            RtcConfig::default(),
            Collaborators {
                connector,
                tokens: Arc::new(StaticToken(token.to_string())),
                connections: Arc::new(FakeConnectionFactory::new()),
                devices: Arc::new(SilentMediaDevices::new()),
                directory: None,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_connect_without_token_fails_fast() {
        let connector = Arc::new(FakeConnector::new());
        let room = session(connector.clone(), "");

        let err = room.connect_to_room("r1", "Ana").await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert!(connector.opened().is_empty());
        assert_eq!(room.state().status, RoomStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_ui_toggles_are_local() {
        let connector = Arc::new(FakeConnector::new());
        let room = session(connector.clone(), "t");

        assert_eq!(room.toggle_view_mode(), ViewMode::Speaker);
        assert_eq!(room.toggle_view_mode(), ViewMode::Grid);
        assert!(room.toggle_chat());
        assert!(room.toggle_participants());
        assert!(!room.toggle_chat());
        assert!(connector.opened().is_empty());
    }

    #[tokio::test]
    async fn test_start_call_outside_room() {
        let room = session(Arc::new(FakeConnector::new()), "t");
        assert!(matches!(room.start_call().await, Err(Error::NotConnected(_))));
        assert_eq!(room.toggle_hand().await, None);
        assert_eq!(room.toggle_mic().await, None);
    }
}
