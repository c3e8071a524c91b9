//! Observable room state

use crate::media::MediaStream;
use crate::peer::{ConnectionState, PeerId};
use crate::session::SignalingHealth;
use crate::signaling::ParticipantRole;
use std::collections::BTreeMap;

/// Lifecycle of a room session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomStatus {
    #[default]
    Disconnected,
    Connecting,
    /// Joined with a role; no media exchanged yet
    Connected,
    /// Offers exchanged with the room
    Active,
    /// We left
    Left,
    /// The room was closed (by the host, the hub, or signaling loss)
    Ended,
}

impl RoomStatus {
    /// Joined and able to exchange media
    pub fn is_joined(&self) -> bool {
        matches!(self, RoomStatus::Connected | RoomStatus::Active)
    }
}

/// Grid of equal tiles or one large active speaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Grid,
    Speaker,
}

impl ViewMode {
    pub fn toggled(self) -> Self {
        match self {
            ViewMode::Grid => ViewMode::Speaker,
            ViewMode::Speaker => ViewMode::Grid,
        }
    }
}

/// Someone else in the room
#[derive(Debug, Clone)]
pub struct Participant {
    pub peer_id: PeerId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: ParticipantRole,
    pub remote_stream: Option<MediaStream>,
    pub is_camera_off: bool,
    pub is_muted: bool,
    pub is_hand_raised: bool,
    /// `None` until a connection to this participant exists
    pub connection: Option<ConnectionState>,
}

impl Participant {
    pub fn new(peer_id: PeerId, display_name: impl Into<String>, role: ParticipantRole) -> Self {
        Self {
            peer_id,
            display_name: display_name.into(),
            avatar_url: None,
            role,
            remote_stream: None,
            is_camera_off: false,
            is_muted: false,
            is_hand_raised: false,
            connection: None,
        }
    }
}

/// Snapshot published to the UI on every change
#[derive(Debug, Clone, Default)]
pub struct RoomState {
    pub status: RoomStatus,
    pub room_id: Option<String>,
    pub self_id: Option<PeerId>,
    pub display_name: String,
    pub is_host: bool,
    pub view_mode: ViewMode,
    /// Everyone except us, at most one entry per peer
    pub participants: BTreeMap<PeerId, Participant>,
    pub show_chat: bool,
    pub show_participants: bool,
    pub local_stream: Option<MediaStream>,
    pub mic_enabled: bool,
    pub camera_enabled: bool,
    pub hand_raised: bool,
    pub signaling: SignalingHealth,
    pub end_reason: Option<String>,
}

/// Events for toasts
#[derive(Debug, Clone, PartialEq)]
pub enum RoomNotice {
    Joined {
        room_id: String,
        self_id: PeerId,
        is_host: bool,
    },
    ParticipantJoined {
        peer_id: PeerId,
        display_name: String,
    },
    ParticipantLeft {
        peer_id: PeerId,
    },
    /// Negotiation or transport failure with one participant
    PeerFailed {
        peer_id: PeerId,
        reason: String,
    },
    RoleChanged {
        is_host: bool,
    },
    RoomEnded {
        reason: Option<String>,
    },
    Left,
    SignalingDegraded,
    SignalingRestored,
}
