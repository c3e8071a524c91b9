//! Local/remote media handles and capture constraints

pub mod silent;
pub mod stream;

pub use silent::SilentMediaDevices;
pub use stream::{MediaSample, MediaStream, MediaTrack, TrackKind};

/// What to capture when acquiring local media
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConstraints {
    /// Capture a microphone track
    pub audio: bool,
    /// Capture a camera track
    pub video: bool,
    /// Preferred microphone device id
    pub audio_device_id: Option<String>,
    /// Preferred camera device id
    pub video_device_id: Option<String>,
}

impl MediaConstraints {
    /// Camera + microphone, or microphone only
    pub fn call(is_video: bool) -> Self {
        Self {
            audio: true,
            video: is_video,
            ..Default::default()
        }
    }

    /// A single track of `kind` from `device_id`
    pub fn single(kind: TrackKind, device_id: impl Into<String>) -> Self {
        let device_id = Some(device_id.into());
        match kind {
            TrackKind::Audio => Self {
                audio: true,
                audio_device_id: device_id,
                ..Default::default()
            },
            TrackKind::Video => Self {
                video: true,
                video_device_id: device_id,
                ..Default::default()
            },
        }
    }
}

/// Local media owned by a call or room session
#[derive(Debug, Clone, Default)]
pub struct LocalMedia {
    /// Acquired stream, `None` before acquisition and after release
    pub stream: Option<MediaStream>,
    /// Microphone enabled flag
    pub audio_enabled: bool,
    /// Camera enabled flag
    pub video_enabled: bool,
}

impl LocalMedia {
    /// Take ownership of a freshly acquired stream
    pub fn attach(&mut self, stream: MediaStream) {
        self.audio_enabled = stream.is_kind_enabled(TrackKind::Audio);
        self.video_enabled = stream.is_kind_enabled(TrackKind::Video);
        self.stream = Some(stream);
    }

    /// Flip the enabled flag of `kind`. Returns the new value, or `None` when
    /// there is no stream or no live track of that kind.
    pub fn toggle(&mut self, kind: TrackKind) -> Option<bool> {
        let stream = self.stream.as_ref()?;
        let next = !stream.is_kind_enabled(kind);
        if stream.set_kind_enabled(kind, next) == 0 {
            return None;
        }
        match kind {
            TrackKind::Audio => self.audio_enabled = next,
            TrackKind::Video => self.video_enabled = next,
        }
        Some(next)
    }

    /// Stop all tracks and drop the stream. Safe to call repeatedly.
    pub fn release(&mut self) -> usize {
        let stopped = self.stream.take().map(|s| s.stop()).unwrap_or(0);
        self.audio_enabled = false;
        self.video_enabled = false;
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_without_stream_is_noop() {
        let mut local = LocalMedia::default();
        assert_eq!(local.toggle(TrackKind::Audio), None);
        assert_eq!(local.release(), 0);
    }

    #[test]
    fn test_toggle_and_release() {
        let mut local = LocalMedia::default();
        let stream = MediaStream::new(vec![MediaTrack::new(TrackKind::Audio, "mic", None)]);
        local.attach(stream.clone());
        assert!(local.audio_enabled);
        assert!(!local.video_enabled);

        assert_eq!(local.toggle(TrackKind::Audio), Some(false));
        assert_eq!(local.toggle(TrackKind::Video), None);
        assert_eq!(local.toggle(TrackKind::Audio), Some(true));

        assert_eq!(local.release(), 1);
        assert_eq!(stream.live_track_count(), 0);
        assert!(local.stream.is_none());
        assert_eq!(local.release(), 0);
    }

    #[test]
    fn test_call_constraints() {
        assert!(MediaConstraints::call(true).video);
        assert!(!MediaConstraints::call(false).video);
        let single = MediaConstraints::single(TrackKind::Video, "cam-2");
        assert!(!single.audio);
        assert_eq!(single.video_device_id.as_deref(), Some("cam-2"));
    }
}
