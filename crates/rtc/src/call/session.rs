//! 1:1 call state machine
//!
//! A [`CallSession`] lives as long as the user's presence on the hub and runs
//! any number of calls, one at a time. UI actions and the driver task (hub
//! events, peer callbacks) serialize on one lock; the observable
//! [`CallState`] is published through a `watch` channel.

use super::state::{CallNotice, CallState, CallStatus};
use crate::config::RtcConfig;
use crate::media::{LocalMedia, MediaConstraints, TrackKind};
use crate::peer::{ConnectionState, PeerId, PeerManager};
use crate::session::{self, Collaborators, Outbox, PeerSignal, SignalingHealth};
use crate::signaling::{ChannelEvent, ChannelStatus, HubEvent, HubRequest, SignalingChannel};
use crate::{Error, Result};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const NOTICE_CAPACITY: usize = 64;

/// Owned by the lock; everything the snapshot does not show
#[derive(Default)]
struct CallCore {
    local: LocalMedia,
    /// Bumped by every teardown and every new call; stale completions compare against it
    epoch: u64,
    /// Media acquisition for a start or accept is running
    setup_in_flight: bool,
    remote_peer: Option<PeerId>,
    /// Offer from the caller while ringing
    pending_offer: Option<String>,
    ticker: Option<JoinHandle<()>>,
}

impl CallCore {
    fn is_remote(&self, peer: &PeerId) -> bool {
        self.remote_peer.as_ref() == Some(peer)
    }
}

struct CallInner {
    config: RtcConfig,
    collab: Collaborators,
    channel: Arc<dyn SignalingChannel>,
    peers: Arc<PeerManager>,
    outbox: Outbox,
    core: Mutex<CallCore>,
    state: Arc<watch::Sender<CallState>>,
    notices: broadcast::Sender<CallNotice>,
}

/// Coordinates 1:1 calls over one signaling channel
pub struct CallSession {
    inner: Arc<CallInner>,
    driver: JoinHandle<()>,
}

fn cancelled() -> Error {
    Error::InvalidState("Call ended during setup".to_string())
}

impl CallSession {
    /// Connect to the hub and start listening for calls
    ///
    /// # Errors
    ///
    /// `Error::Connection` if there is no session token or the hub cannot be
    /// reached; `Error::InvalidConfig` for a bad configuration.
    pub async fn connect(config: RtcConfig, collab: Collaborators) -> Result<Self> {
        config.validate()?;
        let channel = collab.open_channel(&config).await?;
        Self::with_channel(config, collab, channel)
    }

    /// Run calls over an already connected channel
    pub fn with_channel(
        config: RtcConfig,
        collab: Collaborators,
        channel: Arc<dyn SignalingChannel>,
    ) -> Result<Self> {
        let (peers, signals) = session::peer_manager(Arc::clone(&collab.connections), 1)?;
        let events = channel.subscribe();
        let outbox = Outbox::spawn(Arc::clone(&channel));

        let (state, _) = watch::channel(CallState {
            signaling: channel.status().into(),
            ..Default::default()
        });
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let inner = Arc::new(CallInner {
            config,
            collab,
            channel,
            peers,
            outbox,
            core: Mutex::new(CallCore::default()),
            state: Arc::new(state),
            notices,
        });
        let driver = tokio::spawn(drive(Arc::downgrade(&inner), events, signals));

        Ok(Self { inner, driver })
    }

    /// Current snapshot
    pub fn state(&self) -> CallState {
        self.inner.state.borrow().clone()
    }

    /// Watch snapshots as they change
    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.inner.state.subscribe()
    }

    /// Incoming-call prompts and end-of-call toasts
    pub fn notices(&self) -> broadcast::Receiver<CallNotice> {
        self.inner.notices.subscribe()
    }

    /// Ring `peer_id`
    ///
    /// Acquires camera+microphone (or microphone only), moves to `Calling`
    /// and sends our offer. The call connects when the remote side accepts.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if the hub is not reachable right now
    /// - `InvalidState` if a call is already in progress, or the call was
    ///   ended before setup finished
    /// - `MediaAcquisition` if media could not be acquired (state unchanged)
    #[instrument(skip(self), fields(peer_id = %peer_id))]
    pub async fn start_call(&self, peer_id: PeerId, is_video: bool) -> Result<()> {
        let inner = &self.inner;

        let epoch = {
            let mut core = inner.core.lock().await;
            let status = inner.status();
            if status.is_active() || core.setup_in_flight {
                return Err(Error::InvalidState(format!(
                    "Cannot start a call while {:?}",
                    status
                )));
            }
            if inner.channel.status() != ChannelStatus::Connected {
                return Err(Error::NotConnected(
                    "Signaling hub is not connected".to_string(),
                ));
            }
            core.epoch += 1;
            core.setup_in_flight = true;
            core.epoch
        };

        let stream = match inner
            .collab
            .devices
            .acquire(&MediaConstraints::call(is_video))
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                let mut core = inner.core.lock().await;
                if core.epoch == epoch {
                    core.setup_in_flight = false;
                }
                warn!("Could not acquire media for call: {}", e);
                return Err(e);
            }
        };

        {
            let mut core = inner.core.lock().await;
            if core.epoch != epoch {
                stream.stop();
                return Err(cancelled());
            }
            core.setup_in_flight = false;
            core.remote_peer = Some(peer_id.clone());
            core.local.attach(stream.clone());

            let signaling = inner.state.borrow().signaling;
            inner.state.send_replace(CallState {
                status: CallStatus::Calling,
                peer_id: Some(peer_id.clone()),
                peer_name: Some(inner.collab.display_name(&peer_id, None)),
                peer_avatar_url: inner.collab.avatar_url(&peer_id),
                is_video,
                local_stream: Some(stream.clone()),
                audio_enabled: core.local.audio_enabled,
                video_enabled: core.local.video_enabled,
                remote_audio_enabled: true,
                remote_video_enabled: is_video,
                signaling,
                ..Default::default()
            });
            info!("Calling {}", peer_id);
        }

        inner.peers.set_local_stream(stream).await;
        let sent = match inner.peers.create_offer(&peer_id).await {
            Ok(sdp) => inner
                .channel
                .invoke(HubRequest::StartCall {
                    to: peer_id.clone(),
                    sdp,
                    is_video,
                })
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        let mut core = inner.core.lock().await;
        if core.epoch != epoch {
            inner.unwind_stale(&core, &peer_id).await;
            return Err(cancelled());
        }
        if let Err(e) = sent {
            inner
                .fail(&mut core, format!("Could not place call: {}", e), true)
                .await;
            return Err(e);
        }
        Ok(())
    }

    /// Answer the ringing call
    ///
    /// # Errors
    ///
    /// `InvalidState` unless ringing; `MediaAcquisition` if media could not
    /// be acquired (still ringing); negotiation and signaling errors fail
    /// the call.
    #[instrument(skip(self))]
    pub async fn accept_call(&self) -> Result<()> {
        let inner = &self.inner;

        let (epoch, peer_id, offer, is_video) = {
            let mut core = inner.core.lock().await;
            let (status, is_video) = {
                let state = inner.state.borrow();
                (state.status, state.is_video)
            };
            if status != CallStatus::Ringing || core.setup_in_flight {
                return Err(Error::InvalidState(format!(
                    "Cannot accept a call while {:?}",
                    status
                )));
            }
            let (Some(peer_id), Some(offer)) = (core.remote_peer.clone(), core.pending_offer.clone())
            else {
                return Err(Error::InvalidState("No pending offer".to_string()));
            };
            core.setup_in_flight = true;
            (core.epoch, peer_id, offer, is_video)
        };

        let stream = match inner
            .collab
            .devices
            .acquire(&MediaConstraints::call(is_video))
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                let mut core = inner.core.lock().await;
                if core.epoch == epoch {
                    core.setup_in_flight = false;
                }
                warn!("Could not acquire media to accept call: {}", e);
                return Err(e);
            }
        };

        {
            let mut core = inner.core.lock().await;
            if core.epoch != epoch {
                stream.stop();
                return Err(cancelled());
            }
            core.local.attach(stream.clone());
            let (audio, video) = (core.local.audio_enabled, core.local.video_enabled);
            inner.state.send_modify(|s| {
                s.local_stream = Some(stream.clone());
                s.audio_enabled = audio;
                s.video_enabled = video;
            });
        }

        inner.peers.set_local_stream(stream).await;
        let result = async {
            let answer = inner.peers.handle_offer(&peer_id, offer).await?;
            inner
                .channel
                .invoke(HubRequest::AcceptCall {
                    to: peer_id.clone(),
                    sdp: answer,
                })
                .await?;
            Ok::<_, Error>(())
        }
        .await;

        let mut core = inner.core.lock().await;
        if core.epoch != epoch {
            inner.unwind_stale(&core, &peer_id).await;
            return Err(cancelled());
        }
        core.setup_in_flight = false;
        if let Err(e) = result {
            inner
                .fail(&mut core, format!("Could not accept call: {}", e), true)
                .await;
            return Err(e);
        }
        inner.mark_connected(&mut core, &peer_id);
        Ok(())
    }

    /// Turn down the ringing call
    pub async fn decline_call(&self) -> Result<()> {
        let inner = &self.inner;
        let peer = {
            let mut core = inner.core.lock().await;
            let status = inner.status();
            if status != CallStatus::Ringing {
                return Err(Error::InvalidState(format!(
                    "Cannot decline a call while {:?}",
                    status
                )));
            }
            let peer = core.remote_peer.clone();
            inner.teardown(&mut core, CallStatus::Declined, None).await;
            peer
        };
        inner.notify(CallNotice::Declined { reason: None });

        if let Some(peer) = peer {
            info!("Declined call from {}", peer);
            if let Err(e) = inner
                .channel
                .invoke(HubRequest::DeclineCall {
                    to: peer,
                    reason: None,
                })
                .await
            {
                warn!("Could not notify caller of decline: {}", e);
            }
        }
        Ok(())
    }

    /// Hang up. A no-op when no call is in progress.
    pub async fn end_call(&self) -> Result<()> {
        let inner = &self.inner;
        let peer = {
            let mut core = inner.core.lock().await;
            if !inner.status().is_active() && !core.setup_in_flight {
                debug!("No call to end");
                return Ok(());
            }
            let peer = core.remote_peer.clone();
            inner.teardown(&mut core, CallStatus::Ended, None).await;
            peer
        };
        inner.notify(CallNotice::Ended { by_remote: false });

        if let Some(peer) = peer {
            info!("Ended call with {}", peer);
            if let Err(e) = inner.channel.invoke(HubRequest::EndCall { to: peer }).await {
                warn!("Could not notify peer of hang-up: {}", e);
            }
        }
        Ok(())
    }

    /// Mute/unmute the microphone. `None` when there is no local media.
    pub async fn toggle_audio(&self) -> Option<bool> {
        self.inner.toggle(TrackKind::Audio).await
    }

    /// Turn the camera on/off. `None` when there is no local media.
    pub async fn toggle_video(&self) -> Option<bool> {
        self.inner.toggle(TrackKind::Video).await
    }

    /// Move the `kind` track to another capture device mid-call
    pub async fn switch_device(&self, kind: TrackKind, device_id: &str) -> Result<()> {
        let inner = &self.inner;
        let mut core = inner.core.lock().await;
        if !inner.status().is_active() {
            return Err(Error::InvalidState("No call in progress".to_string()));
        }
        session::switch_track(
            inner.collab.devices.as_ref(),
            Some(inner.peers.as_ref()),
            &mut core.local,
            kind,
            device_id,
        )
        .await?;
        let stream = core.local.stream.clone();
        inner.state.send_modify(|s| s.local_stream = stream);
        Ok(())
    }

    /// End any call and close the signaling channel
    pub async fn disconnect(&self) {
        if let Err(e) = self.end_call().await {
            warn!("Error ending call on disconnect: {}", e);
        }
        self.driver.abort();
        self.inner.channel.disconnect().await;
        self.inner
            .state
            .send_modify(|s| s.signaling = SignalingHealth::Offline);
        info!("Call session disconnected");
    }
}

/// Dropping the session hangs up: local tracks stop right away, the
/// connections and the channel close on a spawned task.
impl Drop for CallSession {
    fn drop(&mut self) {
        self.driver.abort();
        if let Ok(mut core) = self.inner.core.try_lock() {
            core.local.release();
        }

        let inner = Arc::clone(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { inner.shutdown().await });
            }
            Err(_) => warn!("Call session dropped outside a runtime, connections not closed"),
        }
    }
}

impl Drop for CallInner {
    fn drop(&mut self) {
        if let Some(ticker) = self.core.get_mut().ticker.take() {
            ticker.abort();
        }
    }
}

impl CallInner {
    fn status(&self) -> CallStatus {
        self.state.borrow().status
    }

    fn notify(&self, notice: CallNotice) {
        let _ = self.notices.send(notice);
    }

    /// Release everything the call holds and publish `status`
    async fn shutdown(&self) {
        let peer = {
            let mut core = self.core.lock().await;
            if self.status().is_active() || core.setup_in_flight {
                let peer = core.remote_peer.clone();
                self.teardown(&mut core, CallStatus::Ended, None).await;
                peer
            } else {
                core.local.release();
                self.peers.close_all().await;
                None
            }
        };

        if let Some(peer) = peer {
            if let Err(e) = self.channel.invoke(HubRequest::EndCall { to: peer }).await {
                warn!("Could not notify peer of hang-up: {}", e);
            }
        }
        self.channel.disconnect().await;
        self.state
            .send_modify(|s| s.signaling = SignalingHealth::Offline);
        info!("Call session closed on drop");
    }

    async fn teardown(&self, core: &mut CallCore, status: CallStatus, reason: Option<String>) {
        core.epoch += 1;
        core.setup_in_flight = false;
        core.pending_offer = None;
        core.remote_peer = None;
        if let Some(ticker) = core.ticker.take() {
            ticker.abort();
        }

        let stopped = core.local.release();
        self.peers.close_all().await;
        self.peers.clear_local_stream();
        debug!("Call torn down ({:?}), stopped {} tracks", status, stopped);

        self.state.send_modify(|s| {
            s.status = status;
            s.local_stream = None;
            s.remote_stream = None;
            s.audio_enabled = false;
            s.video_enabled = false;
            s.end_reason = reason;
        });
    }

    /// Tear down as failed; optionally tell the remote side
    async fn fail(&self, core: &mut CallCore, reason: String, notify_remote: bool) {
        warn!("Call failed: {}", reason);
        let peer = core.remote_peer.clone();
        self.teardown(core, CallStatus::Failed, Some(reason.clone()))
            .await;
        if notify_remote {
            if let Some(peer) = peer {
                self.outbox.send(HubRequest::EndCall { to: peer });
            }
        }
        self.notify(CallNotice::Failed { reason });
    }

    /// A setup step finished after its call was torn down: close what it may
    /// have created, unless a new call with the same peer is running.
    async fn unwind_stale(&self, core: &CallCore, peer_id: &PeerId) {
        let reused = core.is_remote(peer_id) && self.status().is_active();
        if !reused {
            self.peers.close_peer_connection(peer_id).await;
        }
    }

    fn mark_connected(&self, core: &mut CallCore, peer_id: &PeerId) {
        info!("Call connected with {}", peer_id);
        self.state.send_modify(|s| {
            s.status = CallStatus::Connected;
            s.started_at = Some(Instant::now());
            s.duration_secs = 0;
        });
        if let Some(old) = core.ticker.take() {
            old.abort();
        }
        core.ticker = Some(spawn_ticker(
            Arc::clone(&self.state),
            self.config.duration_tick(),
        ));
        self.notify(CallNotice::Connected {
            peer_id: peer_id.clone(),
        });
    }

    async fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let mut core = self.core.lock().await;
        let enabled = core.local.toggle(kind)?;
        self.state.send_modify(|s| match kind {
            TrackKind::Audio => s.audio_enabled = enabled,
            TrackKind::Video => s.video_enabled = enabled,
        });
        debug!("{} {}", kind, if enabled { "enabled" } else { "disabled" });
        Some(enabled)
    }

    async fn on_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Hub(event) => self.on_hub_event(event).await,
            ChannelEvent::Reconnecting { attempt } => {
                info!("Signaling reconnecting (attempt {})", attempt);
                self.state
                    .send_modify(|s| s.signaling = SignalingHealth::Reconnecting);
                if attempt == 1 {
                    self.notify(CallNotice::SignalingDegraded);
                }
            }
            ChannelEvent::Reconnected => {
                self.state
                    .send_modify(|s| s.signaling = SignalingHealth::Online);
                self.notify(CallNotice::SignalingRestored);
            }
            ChannelEvent::Closed { reason } => {
                self.state
                    .send_modify(|s| s.signaling = SignalingHealth::Offline);
                let mut core = self.core.lock().await;
                if self.status().is_active() || core.setup_in_flight {
                    self.fail(
                        &mut core,
                        format!("Signaling connection lost: {}", reason),
                        false,
                    )
                    .await;
                }
            }
        }
    }

    async fn on_hub_event(&self, event: HubEvent) {
        let mut core = self.core.lock().await;
        let status = self.status();

        match event {
            HubEvent::IncomingCall {
                from,
                caller_name,
                sdp,
                is_video,
            } => {
                if status.is_active() || core.setup_in_flight {
                    if core.is_remote(&from) {
                        warn!("Duplicate call from {}", from);
                        return;
                    }
                    info!("Busy, declining call from {}", from);
                    self.outbox.send(HubRequest::DeclineCall {
                        to: from.clone(),
                        reason: Some("busy".to_string()),
                    });
                    self.notify(CallNotice::MissedCall { from });
                    return;
                }

                core.epoch += 1;
                core.remote_peer = Some(from.clone());
                core.pending_offer = Some(sdp);

                let display_name = self.collab.display_name(&from, caller_name.as_deref());
                let signaling = self.state.borrow().signaling;
                self.state.send_replace(CallState {
                    status: CallStatus::Ringing,
                    peer_id: Some(from.clone()),
                    peer_name: Some(display_name.clone()),
                    peer_avatar_url: self.collab.avatar_url(&from),
                    is_video,
                    remote_audio_enabled: true,
                    remote_video_enabled: is_video,
                    signaling,
                    ..Default::default()
                });
                info!("Incoming call from {}", from);
                self.notify(CallNotice::IncomingCall {
                    from,
                    display_name,
                    is_video,
                });
            }

            HubEvent::CallAccepted { from, sdp } => {
                if status != CallStatus::Calling || !core.is_remote(&from) {
                    debug!("Ignoring accept from {} while {:?}", from, status);
                    return;
                }
                match self.peers.handle_answer(&from, sdp).await {
                    Ok(()) => self.mark_connected(&mut core, &from),
                    Err(e) => {
                        self.fail(&mut core, format!("Negotiation failed: {}", e), true)
                            .await
                    }
                }
            }

            HubEvent::CallDeclined { from, reason } => {
                if status != CallStatus::Calling || !core.is_remote(&from) {
                    return;
                }
                info!("Call declined by {}", from);
                self.teardown(&mut core, CallStatus::Declined, reason.clone())
                    .await;
                self.notify(CallNotice::Declined { reason });
            }

            HubEvent::CallEnded { from } => {
                if !status.is_active() || !core.is_remote(&from) {
                    return;
                }
                info!("Call ended by {}", from);
                self.teardown(&mut core, CallStatus::Ended, None).await;
                self.notify(CallNotice::Ended { by_remote: true });
            }

            HubEvent::CallFailed { from, reason } => {
                let ours = from.as_ref().map_or(true, |f| core.is_remote(f));
                if status.is_active() && ours {
                    self.fail(&mut core, reason, false).await;
                }
            }

            HubEvent::OfferReceived { from, sdp } => {
                // Renegotiation from the remote side of a running call
                if status != CallStatus::Connected || !core.is_remote(&from) {
                    debug!("Ignoring offer from {} while {:?}", from, status);
                    return;
                }
                match self.peers.handle_offer(&from, sdp).await {
                    Ok(answer) => self.outbox.send(HubRequest::SendAnswer {
                        to: from,
                        sdp: answer,
                    }),
                    Err(e) => {
                        self.fail(&mut core, format!("Renegotiation failed: {}", e), true)
                            .await
                    }
                }
            }

            HubEvent::AnswerReceived { from, sdp } => {
                if status != CallStatus::Connected || !core.is_remote(&from) {
                    return;
                }
                if let Err(e) = self.peers.handle_answer(&from, sdp).await {
                    self.fail(&mut core, format!("Renegotiation failed: {}", e), true)
                        .await;
                }
            }

            HubEvent::IceCandidateReceived { from, candidate } => {
                // Candidates may precede the call that uses them
                if core.remote_peer.is_some() && !core.is_remote(&from) {
                    debug!("Ignoring candidate from {}", from);
                    return;
                }
                if let Err(e) = self.peers.add_ice_candidate(&from, candidate).await {
                    warn!("Remote ICE candidate rejected: {}", e);
                }
            }

            HubEvent::ParticipantMediaChanged {
                peer_id,
                is_muted,
                is_camera_off,
            } => {
                if core.is_remote(&peer_id) {
                    self.state.send_modify(|s| {
                        s.remote_audio_enabled = !is_muted;
                        s.remote_video_enabled = !is_camera_off;
                    });
                }
            }

            other => debug!("Call session ignoring {:?}", other),
        }
    }

    async fn on_peer_signal(&self, signal: PeerSignal) {
        match signal {
            PeerSignal::LocalCandidate(peer, candidate) => {
                self.outbox.send(HubRequest::SendIceCandidate {
                    to: peer,
                    candidate,
                });
            }
            PeerSignal::RemoteStream(peer, stream) => {
                let core = self.core.lock().await;
                if core.is_remote(&peer) && self.status().is_active() {
                    debug!("Remote stream from {}", peer);
                    self.state.send_modify(|s| s.remote_stream = Some(stream));
                }
            }
            PeerSignal::State(peer, state) => {
                let mut core = self.core.lock().await;
                if !core.is_remote(&peer) || !self.status().is_active() {
                    return;
                }
                match state {
                    ConnectionState::Failed => {
                        self.fail(&mut core, "Peer connection failed".to_string(), true)
                            .await
                    }
                    ConnectionState::Closed => {
                        self.fail(&mut core, "Peer connection closed".to_string(), true)
                            .await
                    }
                    ConnectionState::Disconnected => {
                        warn!("Peer connection to {} interrupted", peer)
                    }
                    other => debug!("Peer connection to {} is {:?}", peer, other),
                }
            }
        }
    }
}

fn spawn_ticker(state: Arc<watch::Sender<CallState>>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = tokio::time::Instant::now();
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let secs = started.elapsed().as_secs();
            state.send_modify(|s| {
                if s.status == CallStatus::Connected {
                    s.duration_secs = secs;
                }
            });
        }
    })
}

async fn drive(
    inner: Weak<CallInner>,
    mut events: broadcast::Receiver<ChannelEvent>,
    mut signals: mpsc::UnboundedReceiver<PeerSignal>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.on_channel_event(event).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Call driver skipped {} signaling events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            Some(signal) = signals.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.on_peer_signal(signal).await;
            }
        }
    }
    debug!("Call driver stopped");
}
