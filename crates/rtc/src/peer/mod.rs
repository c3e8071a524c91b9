//! Peer connection management

pub mod connection;
pub mod manager;
pub mod negotiation;
pub mod rtc_backend;

pub use connection::{ConnectionEvents, ConnectionFactory, RtcConnection};
pub use manager::{
    LocalCandidateHandler, PeerCallbacks, PeerInfo, PeerManager, PeerStateHandler,
    RemoteStreamHandler,
};
pub use negotiation::{
    ConnectionState, IceCandidate, NegotiationRole, PeerId, SdpKind, SessionDescription,
};
pub use rtc_backend::{WebRtcConnection, WebRtcConnectionFactory};
