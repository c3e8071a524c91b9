//! Signaling hub client
//!
//! JSON-RPC 2.0 over WebSocket with automatic reconnection.

pub mod channel;
pub mod hub;
pub mod protocol;
pub mod reconnect;

pub use channel::{ChannelEvent, ChannelStatus, SignalingChannel, SignalingConnector};
pub use hub::{HubConnection, HubConnector};
pub use protocol::{
    error_codes, HubEvent, HubRequest, JoinRoomResponse, ParticipantRole, RosterEntry,
};
pub use reconnect::ReconnectionPolicy;
