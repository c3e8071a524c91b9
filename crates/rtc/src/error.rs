//! Error types for call and room coordination

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating calls and rooms
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An action needs a live signaling channel but none is available
    #[error("Signaling channel not connected: {0}")]
    NotConnected(String),

    /// Camera or microphone could not be acquired
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Offer/answer/ICE application failed for a peer
    #[error("Negotiation with peer {peer_id} failed: {reason}")]
    Negotiation {
        /// Peer whose connection failed to negotiate
        peer_id: String,
        /// Transport-level reason
        reason: String,
    },

    /// Signaling handshake failed
    #[error("Signaling connection failed: {0}")]
    Connection(String),

    /// The hub answered a request with an error
    #[error("Signaling error {code}: {message}")]
    Signaling {
        /// JSON-RPC error code
        code: i32,
        /// Message sent by the hub
        message: String,
    },

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Action not allowed from the current call/room state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Build a negotiation error for `peer_id`
    pub fn negotiation(peer_id: impl ToString, reason: impl ToString) -> Self {
        Error::Negotiation {
            peer_id: peer_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtc(e.to_string())
    }
}
