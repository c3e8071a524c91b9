//! Configuration types for call and room sessions

use crate::signaling::ReconnectionPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration shared by call and room sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtcConfig {
    /// WebSocket signaling hub URL (ws:// or wss://)
    pub signaling_url: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Maximum remote peers in a room mesh (default: 8, max: 10)
    pub max_peers: u32,

    /// Signaling handshake timeout in milliseconds (default: 10000)
    pub connect_timeout_ms: u64,

    /// Timeout for a single hub request in milliseconds (default: 10000)
    pub invoke_timeout_ms: u64,

    /// Call duration tick period in milliseconds (default: 1000)
    pub duration_tick_ms: u64,

    /// Signaling reconnection settings
    pub reconnect: ReconnectOptions,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Signaling reconnection knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectOptions {
    /// Maximum reconnection attempts (default: 5)
    pub max_retries: u32,

    /// Initial backoff in milliseconds (default: 1000)
    pub backoff_initial_ms: u64,

    /// Maximum backoff in milliseconds (default: 30000)
    pub backoff_max_ms: u64,

    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,

    /// Add up to 25% random jitter to each delay (default: true)
    pub jitter: bool,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080/hubs/signaling".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            max_peers: 8,
            connect_timeout_ms: 10_000,
            invoke_timeout_ms: 10_000,
            duration_tick_ms: 1_000,
            reconnect: ReconnectOptions::default(),
        }
    }
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RtcConfig {
    /// Parse a configuration from TOML text; missing fields take defaults
    pub fn from_toml_str(text: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a WebSocket URL
    /// - `stun_servers` is empty or contains a non-`stun:` URL
    /// - a TURN URL does not start with `turn:` or `turns:`
    /// - `max_peers` is not in range 1-10
    /// - a timeout or the tick period is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if let Some(bad) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!("Invalid STUN URL: {}", bad)));
        }

        if let Some(bad) = self
            .turn_servers
            .iter()
            .find(|t| !t.url.starts_with("turn:") && !t.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!("Invalid TURN URL: {}", bad.url)));
        }

        // Full mesh: every participant holds a connection to every other one.
        if self.max_peers == 0 || self.max_peers > 10 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-10, got {}",
                self.max_peers
            )));
        }

        if self.connect_timeout_ms == 0 || self.invoke_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "Signaling timeouts must be non-zero".to_string(),
            ));
        }

        if self.duration_tick_ms == 0 {
            return Err(Error::InvalidConfig(
                "duration_tick_ms must be non-zero".to_string(),
            ));
        }

        if self.reconnect.backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "reconnect.backoff_multiplier must be >= 1.0, got {}",
                self.reconnect.backoff_multiplier
            )));
        }

        Ok(())
    }

    /// Reconnection policy for the signaling hub
    pub fn reconnection_policy(&self) -> ReconnectionPolicy {
        ReconnectionPolicy {
            max_retries: self.reconnect.max_retries,
            backoff_initial_ms: self.reconnect.backoff_initial_ms,
            backoff_max_ms: self.reconnect.backoff_max_ms,
            backoff_multiplier: self.reconnect.backoff_multiplier,
            jitter_enabled: self.reconnect.jitter,
        }
    }

    /// Signaling handshake timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Hub request timeout
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }

    /// Call duration tick period
    pub fn duration_tick(&self) -> Duration {
        Duration::from_millis(self.duration_tick_ms)
    }
}
