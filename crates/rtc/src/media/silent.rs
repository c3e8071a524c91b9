//! Media devices that hand out track handles with no capture behind them
//!
//! Used by headless clients (the `room-probe` binary) and by tests. A denied
//! instance behaves like a user rejecting the permission prompt.
//!
//! Microphone tracks carry a 20 ms Opus silence frame per tick until stopped,
//! so the far end sees real RTP. Camera tracks carry no frames.

use super::{MediaConstraints, MediaSample, MediaStream, MediaTrack, TrackKind};
use crate::ports::MediaDevices;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;

/// Opus TOC 0xf8 (CELT fullband, 20 ms, mono) followed by a silence payload
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Push silence into `track` in real time until it is stopped
fn pump_silence(track: MediaTrack) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FRAME_DURATION);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        while track.is_live() {
            ticker.tick().await;
            track.push_sample(MediaSample::new(OPUS_SILENCE.to_vec(), FRAME_DURATION));
        }
        debug!("Silence pump for track {} stopped", track.id());
    });
}

/// Silent synthetic camera/microphone
#[derive(Default)]
pub struct SilentMediaDevices {
    deny: bool,
    delay: Option<Duration>,
    issued: Mutex<Vec<MediaStream>>,
}

impl SilentMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every acquisition fails as if permission was denied
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Default::default()
        }
    }

    /// Suspend each acquisition for `delay` (simulates a permission prompt)
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// Every stream handed out so far
    pub fn issued(&self) -> Vec<MediaStream> {
        self.issued.lock().clone()
    }

    /// Live tracks across every stream handed out so far
    pub fn live_track_count(&self) -> usize {
        self.issued.lock().iter().map(|s| s.live_track_count()).sum()
    }
}

#[async_trait]
impl MediaDevices for SilentMediaDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.deny {
            return Err(Error::MediaAcquisition("Permission denied".to_string()));
        }

        if !constraints.audio && !constraints.video {
            return Err(Error::MediaAcquisition(
                "At least one of audio or video must be requested".to_string(),
            ));
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            let microphone = MediaTrack::new(
                TrackKind::Audio,
                "silent microphone",
                constraints.audio_device_id.clone(),
            );
            pump_silence(microphone.clone());
            tracks.push(microphone);
        }
        if constraints.video {
            tracks.push(MediaTrack::new(
                TrackKind::Video,
                "blank camera",
                constraints.video_device_id.clone(),
            ));
        }

        let stream = MediaStream::new(tracks);
        debug!("Issued silent stream {} ({:?})", stream.id(), constraints);
        self.issued.lock().push(stream.clone());
        Ok(stream)
    }
}
