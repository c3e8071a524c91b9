//! Shared media stream and track handles
//!
//! A [`MediaStream`] is a cheap, cloneable handle. The local stream is shared
//! by the session and every peer connection in a mesh, but only the session
//! that acquired it calls [`MediaStream::stop`].
//!
//! Encoded frames travel through each track as [`MediaSample`]s: a capture
//! source pushes them with [`MediaTrack::push_sample`] and every connection the
//! track is attached to forwards them onto the wire.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Frames buffered per subscriber before the slowest one starts lagging
const SAMPLE_BUFFER: usize = 64;

/// One encoded frame (Opus for audio, VP8 for video)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSample {
    pub data: Bytes,
    pub duration: Duration,
}

impl MediaSample {
    pub fn new(data: impl Into<Bytes>, duration: Duration) -> Self {
        Self {
            data: data.into(),
            duration,
        }
    }
}

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Microphone or remote audio
    Audio,
    /// Camera or remote video
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    device_id: Option<String>,
    enabled: AtomicBool,
    live: AtomicBool,
    /// Dropped on stop so subscribers see the end of the track
    samples: Mutex<Option<broadcast::Sender<MediaSample>>>,
}

/// A single audio or video track
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create a live, enabled track
    pub fn new(kind: TrackKind, label: impl Into<String>, device_id: Option<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), kind, label, device_id)
    }

    /// Create a live, enabled track with a known id (remote tracks)
    pub fn with_id(
        id: impl Into<String>,
        kind: TrackKind,
        label: impl Into<String>,
        device_id: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                label: label.into(),
                device_id,
                enabled: AtomicBool::new(true),
                live: AtomicBool::new(true),
                samples: Mutex::new(Some(broadcast::channel(SAMPLE_BUFFER).0)),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Device the track was captured from, if local
    pub fn device_id(&self) -> Option<&str> {
        self.inner.device_id.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Mute/unmute without renegotiation. Ignored once the track is stopped.
    pub fn set_enabled(&self, enabled: bool) {
        if self.is_live() {
            self.inner.enabled.store(enabled, Ordering::SeqCst);
        }
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Stop the track. Returns `true` only for the call that actually stopped it.
    pub fn stop(&self) -> bool {
        let was_live = self.inner.live.swap(false, Ordering::SeqCst);
        if was_live {
            self.inner.enabled.store(false, Ordering::SeqCst);
            self.inner.samples.lock().take();
        }
        was_live
    }

    /// Hand one encoded frame to every subscriber.
    ///
    /// Frames pushed while the track is disabled or stopped are dropped, so a
    /// muted track sends nothing. Returns whether anyone received the frame.
    pub fn push_sample(&self, sample: MediaSample) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match self.inner.samples.lock().as_ref() {
            Some(tx) => tx.send(sample).is_ok(),
            None => false,
        }
    }

    /// Receive frames pushed from now on. `None` once the track is stopped.
    pub fn subscribe_samples(&self) -> Option<broadcast::Receiver<MediaSample>> {
        self.inner.samples.lock().as_ref().map(|tx| tx.subscribe())
    }

    /// Whether both handles refer to the same track
    pub fn ptr_eq(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

struct StreamInner {
    id: String,
    tracks: RwLock<Vec<MediaTrack>>,
}

/// A group of tracks captured or received together
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl MediaStream {
    /// Create a stream with a random id
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), tracks)
    }

    pub fn with_id(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: id.into(),
                tracks: RwLock::new(tracks),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.inner.tracks.read().clone()
    }

    pub fn tracks_of(&self, kind: TrackKind) -> Vec<MediaTrack> {
        self.inner
            .tracks
            .read()
            .iter()
            .filter(|t| t.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.inner.tracks.read().iter().any(|t| t.kind() == kind)
    }

    /// Add a track unless one with the same id is already present
    pub fn add_track(&self, track: MediaTrack) -> bool {
        let mut tracks = self.inner.tracks.write();
        if tracks.iter().any(|t| t.id() == track.id()) {
            return false;
        }
        tracks.push(track);
        true
    }

    /// Replace every track of `track.kind()` with `track`, returning the old ones
    pub fn replace_kind(&self, track: MediaTrack) -> Vec<MediaTrack> {
        let mut tracks = self.inner.tracks.write();
        let (old, mut kept): (Vec<_>, Vec<_>) =
            tracks.drain(..).partition(|t| t.kind() == track.kind());
        kept.push(track);
        *tracks = kept;
        old
    }

    /// Set `enabled` on every track of `kind`; returns the number touched
    pub fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) -> usize {
        let tracks = self.inner.tracks.read();
        let mut touched = 0;
        for track in tracks.iter().filter(|t| t.kind() == kind && t.is_live()) {
            track.set_enabled(enabled);
            touched += 1;
        }
        touched
    }

    /// Whether any live track of `kind` is enabled
    pub fn is_kind_enabled(&self, kind: TrackKind) -> bool {
        self.inner
            .tracks
            .read()
            .iter()
            .any(|t| t.kind() == kind && t.is_live() && t.is_enabled())
    }

    pub fn live_track_count(&self) -> usize {
        self.inner.tracks.read().iter().filter(|t| t.is_live()).count()
    }

    /// Stop every track; returns how many were still live
    pub fn stop(&self) -> usize {
        self.inner
            .tracks
            .read()
            .iter()
            .filter(|t| t.stop())
            .count()
    }

    pub fn ptr_eq(&self, other: &MediaStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("tracks", &*self.inner.tracks.read())
            .finish()
    }
}
