//! Client-side calling core for the Tandem chat app
//!
//! Two session state machines sit on top of a JSON-RPC signaling hub and a
//! WebRTC peer-connection manager:
//!
//! - **[`CallSession`]**: 1:1 audio/video calls (start, ring, accept,
//!   decline, hang up, duration timer)
//! - **[`RoomSession`]**: multi-party rooms as a full mesh, with roster,
//!   raise-hand, mute/camera state and host-only room ending
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  UI shell (subscribes to watch snapshots + notices)   │
//! │  ↓                                                    │
//! │  CallSession / RoomSession (single-writer core)       │
//! │  ├─ SignalingChannel (JSON-RPC 2.0 over WebSocket)    │
//! │  ├─ PeerManager (one RtcConnection per remote peer)   │
//! │  └─ MediaDevices (camera/microphone port)             │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use tandem_rtc::RtcConfig;
//!
//! let config = RtcConfig {
//!     signaling_url: "wss://chat.example.com/hubs/signaling".to_string(),
//!     max_peers: 6,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tandem_rtc::{Collaborators, RoomSession, RtcConfig, SilentMediaDevices, StaticToken};
//!
//! # async fn example() -> tandem_rtc::Result<()> {
//! let config = RtcConfig::default();
//! let collab = Collaborators::webrtc(
//!     &config,
//!     Arc::new(StaticToken("session-token".to_string())),
//!     Arc::new(SilentMediaDevices::new()),
//! );
//! let room = RoomSession::new(config, collab)?;
//! room.connect_to_room("standup", "Ana").await?;
//! room.start_call().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod call;
pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod ports;
pub mod room;
pub mod session;
pub mod signaling;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use call::{CallNotice, CallSession, CallState, CallStatus};
pub use config::{ReconnectOptions, RtcConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use media::{
    LocalMedia, MediaConstraints, MediaSample, MediaStream, MediaTrack, SilentMediaDevices,
    TrackKind,
};
pub use peer::{ConnectionState, IceCandidate, PeerId, PeerManager};
pub use ports::{MediaDevices, PeerDirectory, PeerProfile, StaticToken, TokenProvider};
pub use room::{Participant, RoomNotice, RoomSession, RoomState, RoomStatus, ViewMode};
pub use session::{Collaborators, SignalingHealth};
pub use signaling::{HubConnector, ReconnectionPolicy, SignalingChannel, SignalingConnector};
