//! Peer connection management
//!
//! One [`RtcConnection`] per remote peer, kept in an arena keyed by [`PeerId`].
//! Every exit path (peer left, negotiation failure, teardown) closes the
//! connection explicitly.

use super::connection::{ConnectionEvents, ConnectionFactory, RtcConnection};
use super::negotiation::{ConnectionState, IceCandidate, NegotiationRole, SessionDescription};
use super::PeerId;
use crate::media::MediaStream;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Candidates kept per peer before any entry exists for it
const MAX_EARLY_CANDIDATES_PER_PEER: usize = 32;

/// Distinct peers with early candidates buffered at once
const MAX_EARLY_PEERS: usize = 16;

/// Delivers a remote stream (new or grown by a track) for a peer
pub type RemoteStreamHandler = Arc<dyn Fn(PeerId, MediaStream) + Send + Sync>;

/// Delivers a locally gathered ICE candidate to forward to a peer
pub type LocalCandidateHandler = Arc<dyn Fn(PeerId, IceCandidate) + Send + Sync>;

/// Delivers connection state changes for a peer
pub type PeerStateHandler = Arc<dyn Fn(PeerId, ConnectionState) + Send + Sync>;

/// Callbacks supplied when the manager is constructed
#[derive(Clone)]
pub struct PeerCallbacks {
    pub on_remote_stream: RemoteStreamHandler,
    pub on_local_candidate: LocalCandidateHandler,
    pub on_connection_state: PeerStateHandler,
}

/// Snapshot of one managed peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub role: NegotiationRole,
    pub remote_description_set: bool,
    pub pending_candidates: usize,
}

struct PeerEntry {
    connection: Arc<dyn RtcConnection>,
    role: NegotiationRole,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    /// Shared with the event closures so a closed entry goes silent
    alive: Arc<AtomicBool>,
    /// Closed to make way for the peer's own offer; late candidates move on
    superseded: bool,
}

impl PeerEntry {
    fn is_closed(&self) -> bool {
        !self.alive.load(Ordering::SeqCst)
    }

    async fn shut(&mut self, peer_id: &PeerId) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        let dropped = self.pending_candidates.len();
        self.pending_candidates.clear();
        if dropped > 0 {
            debug!("Discarding {} queued candidates for {}", dropped, peer_id);
        }
        if let Err(e) = self.connection.close().await {
            warn!("Error closing peer connection for {}: {}", peer_id, e);
        }
    }

    /// Apply queued candidates in arrival order. Caller holds the entry lock.
    async fn flush_candidates(&mut self, peer_id: &PeerId) {
        let queued: Vec<_> = self.pending_candidates.drain(..).collect();
        if queued.is_empty() {
            return;
        }
        debug!("Flushing {} queued candidates for {}", queued.len(), peer_id);
        for candidate in queued {
            if let Err(e) = self.connection.add_ice_candidate(candidate).await {
                warn!("Queued ICE candidate rejected for {}: {}", peer_id, e);
            }
        }
    }
}

type SharedEntry = Arc<Mutex<PeerEntry>>;

/// Manages one peer connection per remote participant
pub struct PeerManager {
    factory: Arc<dyn ConnectionFactory>,
    callbacks: PeerCallbacks,
    entries: Mutex<HashMap<PeerId, SharedEntry>>,
    /// Candidates that arrived before any entry existed for the peer
    early_candidates: parking_lot::Mutex<HashMap<PeerId, Vec<IceCandidate>>>,
    local_stream: parking_lot::RwLock<Option<MediaStream>>,
    max_peers: usize,
}

impl PeerManager {
    /// Create a new peer manager
    ///
    /// # Arguments
    ///
    /// * `factory` - Creates the underlying connections
    /// * `callbacks` - Remote stream / local candidate / state sinks
    /// * `max_peers` - Maximum number of simultaneous peer connections
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        callbacks: PeerCallbacks,
        max_peers: usize,
    ) -> Result<Self> {
        if max_peers == 0 {
            return Err(Error::InvalidConfig("max_peers must be at least 1".to_string()));
        }

        Ok(Self {
            factory,
            callbacks,
            entries: Mutex::new(HashMap::new()),
            early_candidates: parking_lot::Mutex::new(HashMap::new()),
            local_stream: parking_lot::RwLock::new(None),
            max_peers,
        })
    }

    fn bind_events(&self, peer_id: &PeerId, alive: &Arc<AtomicBool>) -> ConnectionEvents {
        let callbacks = self.callbacks.clone();

        let (peer, live) = (peer_id.clone(), Arc::clone(alive));
        let on_remote = Arc::clone(&callbacks.on_remote_stream);
        let on_remote_stream = Arc::new(move |stream: MediaStream| {
            if live.load(Ordering::SeqCst) {
                on_remote(peer.clone(), stream);
            }
        });

        let (peer, live) = (peer_id.clone(), Arc::clone(alive));
        let on_candidate = Arc::clone(&callbacks.on_local_candidate);
        let on_local_candidate = Arc::new(move |candidate: IceCandidate| {
            if live.load(Ordering::SeqCst) {
                on_candidate(peer.clone(), candidate);
            }
        });

        let (peer, live) = (peer_id.clone(), Arc::clone(alive));
        let on_state = Arc::clone(&callbacks.on_connection_state);
        let on_state_change = Arc::new(move |state: ConnectionState| {
            if live.load(Ordering::SeqCst) {
                on_state(peer.clone(), state);
            }
        });

        ConnectionEvents {
            on_remote_stream,
            on_local_candidate,
            on_state_change,
        }
    }

    /// Get the entry for `peer_id`, creating it if absent.
    ///
    /// The map lock is held across creation so concurrent callers for the
    /// same peer never produce two connections.
    async fn entry_for(&self, peer_id: &PeerId, role: NegotiationRole) -> Result<SharedEntry> {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get(peer_id) {
            return Ok(Arc::clone(entry));
        }

        if entries.len() >= self.max_peers {
            return Err(Error::InvalidState(format!(
                "Maximum peer limit reached ({})",
                self.max_peers
            )));
        }

        let alive = Arc::new(AtomicBool::new(true));
        let events = self.bind_events(peer_id, &alive);
        let connection = self.factory.create(peer_id, events).await?;

        let pending_candidates = self
            .early_candidates
            .lock()
            .remove(peer_id)
            .unwrap_or_default();

        info!("Adding peer to manager: {} ({:?})", peer_id, role);
        let entry = Arc::new(Mutex::new(PeerEntry {
            connection,
            role,
            remote_description_set: false,
            pending_candidates,
            alive,
            superseded: false,
        }));
        entries.insert(peer_id.clone(), Arc::clone(&entry));

        Ok(entry)
    }

    async fn existing(&self, peer_id: &PeerId) -> Option<SharedEntry> {
        self.entries.lock().await.get(peer_id).cloned()
    }

    /// Close and forget `entry` after a failed negotiation step.
    ///
    /// Called with the entry lock held; only removes the map slot if it still
    /// points at this entry.
    async fn discard(&self, peer_id: &PeerId, entry: &SharedEntry, guard: &mut PeerEntry) {
        {
            let mut entries = self.entries.lock().await;
            if entries.get(peer_id).is_some_and(|e| Arc::ptr_eq(e, entry)) {
                entries.remove(peer_id);
            }
        }
        guard.shut(peer_id).await;
    }

    async fn attach_current_stream(&self, peer_id: &PeerId, entry: &PeerEntry) -> Result<()> {
        let stream = self.local_stream.read().clone();
        if let Some(stream) = stream {
            entry
                .connection
                .attach_local_stream(&stream)
                .await
                .map_err(|e| Error::negotiation(peer_id, e))?;
        }
        Ok(())
    }

    /// Create (or reuse) the entry for `peer_id` and produce a local offer
    #[instrument(skip(self), fields(peer_id = %peer_id))]
    pub async fn create_offer(&self, peer_id: &PeerId) -> Result<String> {
        let entry = self.entry_for(peer_id, NegotiationRole::Offerer).await?;
        let mut guard = entry.lock().await;

        if guard.is_closed() {
            return Err(Error::negotiation(peer_id, "connection closed"));
        }

        let result = async {
            self.attach_current_stream(peer_id, &guard).await?;
            guard
                .connection
                .create_offer()
                .await
                .map_err(|e| Error::negotiation(peer_id, e))
        }
        .await;

        match result {
            Ok(sdp) => {
                if !guard.remote_description_set {
                    guard.role = NegotiationRole::Offerer;
                }
                debug!("Created offer for {}", peer_id);
                Ok(sdp)
            }
            Err(e) => {
                warn!("Offer for {} failed: {}", peer_id, e);
                self.discard(peer_id, &entry, &mut guard).await;
                Err(e)
            }
        }
    }

    /// Apply a remote offer and produce the local answer
    #[instrument(skip(self, sdp), fields(peer_id = %peer_id))]
    pub async fn handle_offer(&self, peer_id: &PeerId, sdp: String) -> Result<String> {
        let entry = self.entry_for(peer_id, NegotiationRole::Answerer).await?;
        let mut guard = entry.lock().await;

        if guard.is_closed() {
            return Err(Error::negotiation(peer_id, "connection closed"));
        }

        let applied = guard
            .connection
            .set_remote_description(SessionDescription::offer(sdp))
            .await
            .map_err(|e| Error::negotiation(peer_id, e));

        if let Err(e) = applied {
            warn!("Remote offer from {} rejected: {}", peer_id, e);
            self.discard(peer_id, &entry, &mut guard).await;
            return Err(e);
        }

        guard.remote_description_set = true;
        guard.role = NegotiationRole::Answerer;
        guard.flush_candidates(peer_id).await;

        let result = async {
            self.attach_current_stream(peer_id, &guard).await?;
            guard
                .connection
                .create_answer()
                .await
                .map_err(|e| Error::negotiation(peer_id, e))
        }
        .await;

        if let Err(e) = &result {
            warn!("Answer for {} failed: {}", peer_id, e);
            self.discard(peer_id, &entry, &mut guard).await;
        }
        result
    }

    /// Apply a remote answer to our outstanding offer.
    ///
    /// A missing entry means the answer arrived out of protocol order; it is
    /// logged and ignored.
    #[instrument(skip(self, sdp), fields(peer_id = %peer_id))]
    pub async fn handle_answer(&self, peer_id: &PeerId, sdp: String) -> Result<()> {
        let Some(entry) = self.existing(peer_id).await else {
            warn!("Answer from {} without a pending offer, ignoring", peer_id);
            return Ok(());
        };
        let mut guard = entry.lock().await;

        if guard.is_closed() {
            debug!("Answer from {} after close, ignoring", peer_id);
            return Ok(());
        }

        let applied = guard
            .connection
            .set_remote_description(SessionDescription::answer(sdp))
            .await
            .map_err(|e| Error::negotiation(peer_id, e));

        if let Err(e) = applied {
            warn!("Remote answer from {} rejected: {}", peer_id, e);
            self.discard(peer_id, &entry, &mut guard).await;
            return Err(e);
        }

        guard.remote_description_set = true;
        guard.flush_candidates(peer_id).await;
        Ok(())
    }

    /// Apply a remote candidate, or queue it until the remote description is set
    pub async fn add_ice_candidate(&self, peer_id: &PeerId, candidate: IceCandidate) -> Result<()> {
        loop {
            let entry = {
                let entries = self.entries.lock().await;
                match entries.get(peer_id) {
                    Some(entry) => Arc::clone(entry),
                    None => {
                        // Checked under the map lock so entry creation cannot miss it.
                        self.buffer_early_candidate(peer_id, candidate);
                        return Ok(());
                    }
                }
            };

            let mut guard = entry.lock().await;
            if guard.is_closed() {
                if guard.superseded {
                    continue;
                }
                debug!("Dropping ICE candidate for closed peer {}", peer_id);
                return Ok(());
            }

            if !guard.remote_description_set {
                debug!("Queueing ICE candidate for {}", peer_id);
                guard.pending_candidates.push(candidate);
                return Ok(());
            }

            return guard
                .connection
                .add_ice_candidate(candidate)
                .await
                .map_err(|e| Error::negotiation(peer_id, e));
        }
    }

    /// Keep a candidate for a peer we have no entry for yet, within bounds
    fn buffer_early_candidate(&self, peer_id: &PeerId, candidate: IceCandidate) {
        let mut early = self.early_candidates.lock();
        if !early.contains_key(peer_id) && early.len() >= MAX_EARLY_PEERS {
            warn!("Too many unknown peers sending candidates, dropping one from {}", peer_id);
            return;
        }
        let queued = early.entry(peer_id.clone()).or_default();
        if queued.len() >= MAX_EARLY_CANDIDATES_PER_PEER {
            debug!("Early candidate buffer full for {}, dropping", peer_id);
            return;
        }
        debug!("Buffering ICE candidate for unknown peer {}", peer_id);
        queued.push(candidate);
    }

    /// Make `stream` the local stream on every open and future connection
    pub async fn set_local_stream(&self, stream: MediaStream) {
        *self.local_stream.write() = Some(stream.clone());

        let entries: Vec<(PeerId, SharedEntry)> = self
            .entries
            .lock()
            .await
            .iter()
            .map(|(id, e)| (id.clone(), Arc::clone(e)))
            .collect();

        for (peer_id, entry) in entries {
            let guard = entry.lock().await;
            if guard.is_closed() {
                continue;
            }
            if let Err(e) = guard.connection.attach_local_stream(&stream).await {
                warn!("Failed to attach local stream to {}: {}", peer_id, e);
            }
        }
    }

    /// Forget the local stream reference. Never stops its tracks.
    pub fn clear_local_stream(&self) {
        self.local_stream.write().take();
    }

    /// Close and remove the connection for `peer_id`, dropping queued candidates.
    ///
    /// Returns `false` when no entry existed.
    pub async fn close_peer_connection(&self, peer_id: &PeerId) -> bool {
        self.early_candidates.lock().remove(peer_id);
        let removed = self.entries.lock().await.remove(peer_id);

        match removed {
            Some(entry) => {
                info!("Removing peer from manager: {}", peer_id);
                entry.lock().await.shut(peer_id).await;
                true
            }
            None => false,
        }
    }

    /// Abandon our unanswered offer to `peer_id` so its offer can be answered.
    ///
    /// The connection is closed; candidates already received from the peer
    /// are kept for the entry that answers. Returns `false` if there was no
    /// unanswered offer.
    pub async fn discard_local_offer(&self, peer_id: &PeerId) -> bool {
        let Some(entry) = self.existing(peer_id).await else {
            return false;
        };
        let mut guard = entry.lock().await;
        if guard.is_closed()
            || guard.role != NegotiationRole::Offerer
            || guard.remote_description_set
        {
            return false;
        }

        {
            // Map lock held so buffered and late candidates keep arrival order
            let mut entries = self.entries.lock().await;
            if entries.get(peer_id).is_some_and(|e| Arc::ptr_eq(e, &entry)) {
                entries.remove(peer_id);
            }
            let kept = std::mem::take(&mut guard.pending_candidates);
            if !kept.is_empty() {
                self.early_candidates
                    .lock()
                    .entry(peer_id.clone())
                    .or_default()
                    .extend(kept);
            }
            guard.superseded = true;
        }

        info!("Discarding local offer to {}", peer_id);
        guard.shut(peer_id).await;
        true
    }

    /// Close every connection
    pub async fn close_all(&self) {
        debug!("Closing all peer connections");
        self.early_candidates.lock().clear();

        let drained: Vec<(PeerId, SharedEntry)> = self.entries.lock().await.drain().collect();
        for (peer_id, entry) in drained {
            entry.lock().await.shut(&peer_id).await;
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn has_peer(&self, peer_id: &PeerId) -> bool {
        self.entries.lock().await.contains_key(peer_id)
    }

    pub async fn peer_ids(&self) -> Vec<PeerId> {
        self.entries.lock().await.keys().cloned().collect()
    }

    /// Whether we sent an offer to `peer_id` that has not been answered yet
    pub async fn is_awaiting_answer(&self, peer_id: &PeerId) -> bool {
        match self.existing(peer_id).await {
            Some(entry) => {
                let guard = entry.lock().await;
                guard.role == NegotiationRole::Offerer && !guard.remote_description_set
            }
            None => false,
        }
    }

    pub async fn peer_info(&self, peer_id: &PeerId) -> Option<PeerInfo> {
        let entry = self.existing(peer_id).await?;
        let guard = entry.lock().await;
        Some(PeerInfo {
            peer_id: peer_id.clone(),
            role: guard.role,
            remote_description_set: guard.remote_description_set,
            pending_candidates: guard.pending_candidates.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaTrack, TrackKind};
    use crate::testing::{FakeConnectionFactory, FakeOp};

    fn noop_callbacks() -> PeerCallbacks {
        PeerCallbacks {
            on_remote_stream: Arc::new(|_, _| {}),
            on_local_candidate: Arc::new(|_, _| {}),
            on_connection_state: Arc::new(|_, _| {}),
        }
    }

    fn manager(factory: &Arc<FakeConnectionFactory>) -> PeerManager {
        PeerManager::new(factory.clone(), noop_callbacks(), 4).unwrap()
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{} 1 udp 1 10.0.0.{} 5000 typ host", n, n))
    }

    #[tokio::test]
    async fn test_invalid_max_peers() {
        let factory = Arc::new(FakeConnectionFactory::new());
        assert!(PeerManager::new(factory, noop_callbacks(), 0).is_err());
    }

    #[tokio::test]
    async fn test_create_offer_twice_reuses_entry() {
        let factory = Arc::new(FakeConnectionFactory::new());
        let manager = manager(&factory);
        let bob = PeerId::from("bob");

        manager.create_offer(&bob).await.unwrap();
        manager.create_offer(&bob).await.unwrap();

        assert_eq!(manager.peer_count().await, 1);
        assert_eq!(factory.created_count(), 1);
        assert_eq!(factory.connection(&bob).unwrap().offers_created(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_create_offer_creates_one_connection() {
        let factory = Arc::new(FakeConnectionFactory::new());
        let manager = Arc::new(manager(&factory));
        let bob = PeerId::from("bob");

        let (a, b) = tokio::join!(manager.create_offer(&bob), manager.create_offer(&bob));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(factory.created_count(), 1);
    }

    #[tokio::test]
    async fn test_candidates_queued_until_answer() {
        let factory = Arc::new(FakeConnectionFactory::new());
        let manager = manager(&factory);
        let bob = PeerId::from("bob");

        manager.create_offer(&bob).await.unwrap();
        manager.add_ice_candidate(&bob, candidate(1)).await.unwrap();
        manager.add_ice_candidate(&bob, candidate(2)).await.unwrap();

        let conn = factory.connection(&bob).unwrap();
        assert!(conn.applied_candidates().is_empty());
        assert_eq!(manager.peer_info(&bob).await.unwrap().pending_candidates, 2);

        manager.handle_answer(&bob, "answer-sdp".to_string()).await.unwrap();
        manager.add_ice_candidate(&bob, candidate(3)).await.unwrap();

        assert_eq!(
            conn.applied_candidates(),
            vec![candidate(1), candidate(2), candidate(3)]
        );
        assert_eq!(manager.peer_info(&bob).await.unwrap().pending_candidates, 0);
    }

    #[tokio::test]
    async fn test_candidates_before_offer_are_kept() {
        let factory = Arc::new(FakeConnectionFactory::new());
        let manager = manager(&factory);
        let alice = PeerId::from("alice");

        manager.add_ice_candidate(&alice, candidate(7)).await.unwrap();
        assert_eq!(manager.peer_count().await, 0);

        manager.handle_offer(&alice, "offer-sdp".to_string()).await.unwrap();

        let conn = factory.connection(&alice).unwrap();
        assert_eq!(conn.applied_candidates(), vec![candidate(7)]);

        // The remote description precedes the flushed candidate
        let ops = conn.ops();
        let remote_at = ops
            .iter()
            .position(|op| matches!(op, FakeOp::SetRemote(_)))
            .unwrap();
        let candidate_at = ops
            .iter()
            .position(|op| matches!(op, FakeOp::AddCandidate(_)))
            .unwrap();
        assert!(remote_at < candidate_at);
    }

    #[tokio::test]
    async fn test_early_candidate_buffer_is_bounded() {
        let factory = Arc::new(FakeConnectionFactory::new());
        let manager = manager(&factory);
        let alice = PeerId::from("alice");

        for n in 0..(MAX_EARLY_CANDIDATES_PER_PEER as u32 + 10) {
            manager.add_ice_candidate(&alice, candidate(n)).await.unwrap();
        }
        for n in 0..(MAX_EARLY_PEERS + 5) {
            let stranger = PeerId::from(format!("stranger-{}", n));
            manager.add_ice_candidate(&stranger, candidate(1)).await.unwrap();
        }
        assert_eq!(manager.early_candidates.lock().len(), MAX_EARLY_PEERS);

        manager.handle_offer(&alice, "offer-sdp".to_string()).await.unwrap();
        let applied = factory.connection(&alice).unwrap().applied_candidates();
        assert_eq!(applied.len(), MAX_EARLY_CANDIDATES_PER_PEER);
        assert_eq!(applied[0], candidate(0));
    }

    #[tokio::test]
    async fn test_handle_answer_without_entry_is_ignored() {
        let factory = Arc::new(FakeConnectionFactory::new());
        let manager = manager(&factory);
        assert!(manager
            .handle_answer(&PeerId::from("ghost"), "sdp".to_string())
            .await
            .is_ok());
        assert_eq!(factory.created_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_remote_description_discards_entry() {
        let factory = Arc::new(FakeConnectionFactory::new());
        factory.fail_remote_description_for(&PeerId::from("bob"));
        let manager = manager(&factory);
        let bob = PeerId::from("bob");

        manager.create_offer(&bob).await.unwrap();
        let err = manager
            .handle_answer(&bob, "broken".to_string())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Negotiation { .. }));
        assert!(!manager.has_peer(&bob).await);
        assert!(factory.connection(&bob).unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_close_peer_discards_queued_candidates() {
        let factory = Arc::new(FakeConnectionFactory::new());
        let manager = manager(&factory);
        let bob = PeerId::from("bob");

        manager.create_offer(&bob).await.unwrap();
        manager.add_ice_candidate(&bob, candidate(1)).await.unwrap();

        assert!(manager.close_peer_connection(&bob).await);
        // Late answer and candidate for the departed peer
        manager.handle_answer(&bob, "late".to_string()).await.unwrap();
        manager.add_ice_candidate(&bob, candidate(2)).await.unwrap();

        let conn = factory.connection(&bob).unwrap();
        assert!(conn.is_closed());
        assert!(conn.applied_candidates().is_empty());
        assert!(!manager.close_peer_connection(&bob).await);
    }

    #[tokio::test]
    async fn test_set_local_stream_reaches_all_peers() {
        let factory = Arc::new(FakeConnectionFactory::new());
        let manager = manager(&factory);

        manager.create_offer(&PeerId::from("a")).await.unwrap();
        manager
            .handle_offer(&PeerId::from("b"), "offer".to_string())
            .await
            .unwrap();

        let stream = MediaStream::new(vec![MediaTrack::new(TrackKind::Audio, "mic", None)]);
        manager.set_local_stream(stream.clone()).await;

        for id in ["a", "b"] {
            let attached = factory.connection(&PeerId::from(id)).unwrap().attached_streams();
            assert!(attached.last().unwrap().ptr_eq(&stream));
        }

        // Attached at creation for later peers
        manager.create_offer(&PeerId::from("c")).await.unwrap();
        let attached = factory.connection(&PeerId::from("c")).unwrap().attached_streams();
        assert_eq!(attached.len(), 1);

        manager.close_all().await;
        assert_eq!(manager.peer_count().await, 0);
        // The manager never stops the stream it was given
        assert_eq!(stream.live_track_count(), 1);
    }

    #[tokio::test]
    async fn test_discard_local_offer_keeps_remote_candidates() {
        let factory = Arc::new(FakeConnectionFactory::new());
        let manager = manager(&factory);
        let bob = PeerId::from("bob");

        manager.create_offer(&bob).await.unwrap();
        let first = factory.connection(&bob).unwrap();
        manager.add_ice_candidate(&bob, candidate(1)).await.unwrap();

        assert!(manager.is_awaiting_answer(&bob).await);
        assert!(manager.discard_local_offer(&bob).await);
        assert!(first.is_closed());
        assert!(!manager.has_peer(&bob).await);

        manager.handle_offer(&bob, "their-offer".to_string()).await.unwrap();
        let second = factory.connection(&bob).unwrap();
        assert!(!second.is_closed());
        assert_eq!(second.applied_candidates(), vec![candidate(1)]);

        // Nothing left to discard once we are the answerer
        assert!(!manager.discard_local_offer(&bob).await);
    }

    #[tokio::test]
    async fn test_max_peers_limit() {
        let factory = Arc::new(FakeConnectionFactory::new());
        let manager = PeerManager::new(factory.clone(), noop_callbacks(), 2).unwrap();

        manager.create_offer(&PeerId::from("a")).await.unwrap();
        manager.create_offer(&PeerId::from("b")).await.unwrap();
        assert!(manager.create_offer(&PeerId::from("c")).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_entry_events_are_suppressed() {
        let factory = Arc::new(FakeConnectionFactory::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callbacks = PeerCallbacks {
            on_remote_stream: Arc::new(move |peer, _| sink.lock().push(peer)),
            ..noop_callbacks()
        };
        let manager = PeerManager::new(factory.clone(), callbacks, 4).unwrap();
        let bob = PeerId::from("bob");

        manager.handle_offer(&bob, "offer".to_string()).await.unwrap();
        let conn = factory.connection(&bob).unwrap();
        conn.emit_remote_stream(MediaStream::new(Vec::new()));
        assert_eq!(seen.lock().len(), 1);

        manager.close_peer_connection(&bob).await;
        conn.emit_remote_stream(MediaStream::new(Vec::new()));
        assert_eq!(seen.lock().len(), 1);
    }
}
