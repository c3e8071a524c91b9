//! Observable 1:1 call state

use crate::media::MediaStream;
use crate::peer::PeerId;
use crate::session::SignalingHealth;
use std::time::Instant;

/// Lifecycle of a 1:1 call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallStatus {
    #[default]
    Idle,
    /// Outbound, waiting for the remote side to accept
    Calling,
    /// Inbound, waiting for us to accept or decline
    Ringing,
    Connected,
    Ended,
    Failed,
    Declined,
}

impl CallStatus {
    /// A call is set up or being set up
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallStatus::Calling | CallStatus::Ringing | CallStatus::Connected
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Ended | CallStatus::Failed | CallStatus::Declined
        )
    }
}

/// Snapshot published to the UI on every change
#[derive(Debug, Clone, Default)]
pub struct CallState {
    pub status: CallStatus,
    pub peer_id: Option<PeerId>,
    pub peer_name: Option<String>,
    pub peer_avatar_url: Option<String>,
    pub is_video: bool,
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<MediaStream>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub remote_audio_enabled: bool,
    pub remote_video_enabled: bool,
    /// When the call reached `Connected`
    pub started_at: Option<Instant>,
    /// Whole seconds connected, advanced by the duration ticker
    pub duration_secs: u64,
    pub signaling: SignalingHealth,
    /// Why the call failed or was declined
    pub end_reason: Option<String>,
}

/// Events for prompts and toasts
#[derive(Debug, Clone, PartialEq)]
pub enum CallNotice {
    IncomingCall {
        from: PeerId,
        display_name: String,
        is_video: bool,
    },
    Connected {
        peer_id: PeerId,
    },
    Ended {
        by_remote: bool,
    },
    Declined {
        reason: Option<String>,
    },
    Failed {
        reason: String,
    },
    /// Someone called while we were busy; they were declined
    MissedCall {
        from: PeerId,
    },
    SignalingDegraded,
    SignalingRestored,
}
