//! Port traits for the collaborators the core consumes.
//!
//! The UI shell supplies implementations; the core never reaches for browser
//! storage, REST endpoints or capture hardware on its own.

use crate::media::{MediaConstraints, MediaStream};
use crate::peer::PeerId;
use crate::Result;
use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Synchronously retrievable session token used as the signaling bearer credential.
pub trait TokenProvider: Send + Sync {
    /// Current token, `None` when the user is signed out.
    fn token(&self) -> Option<String>;
}

/// Fixed token, for headless clients and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Identity resolution
// ---------------------------------------------------------------------------

/// Presentation data for a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerProfile {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Resolves a peer identity (or stable user id) to display data.
pub trait PeerDirectory: Send + Sync {
    fn resolve(&self, peer: &PeerId) -> Option<PeerProfile>;
}

// ---------------------------------------------------------------------------
// Media devices
// ---------------------------------------------------------------------------

/// Camera/microphone access.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire a local stream. May suspend for a permission prompt.
    ///
    /// Fails with [`crate::Error::MediaAcquisition`] when permission is
    /// denied or a requested device is missing.
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream>;
}
