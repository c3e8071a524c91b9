//! Signaling reconnection policy
//!
//! Exponential backoff with optional jitter, used by the hub supervisor after
//! an unexpected close.

use rand::Rng;
use std::time::Duration;

/// Reconnection policy configuration
///
/// Controls how reconnection attempts are made when the signaling socket drops.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    /// Maximum number of reconnection attempts (default: 5)
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds (default: 1000ms)
    pub backoff_initial_ms: u64,
    /// Maximum backoff delay in milliseconds (default: 30000ms)
    pub backoff_max_ms: u64,
    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff (default: true)
    pub jitter_enabled: bool,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_initial_ms: 1000,
            backoff_max_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

impl ReconnectionPolicy {
    /// Never reconnect; the first unexpected close is final
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Short delays without jitter, for loopback hubs
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_initial_ms: 10,
            backoff_max_ms: 50,
            backoff_multiplier: 1.0,
            jitter_enabled: false,
        }
    }

    /// Calculate backoff duration for a given attempt number
    ///
    /// # Arguments
    /// * `attempt` - Current attempt number (0-indexed)
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let backoff_ms = (self.backoff_initial_ms as f64) * self.backoff_multiplier.powi(exponent);
        let backoff_ms = backoff_ms.min(self.backoff_max_ms as f64);

        // Jitter adds 0-25% on top
        let final_ms = if self.jitter_enabled && backoff_ms > 0.0 {
            backoff_ms + rand::thread_rng().gen_range(0.0..=backoff_ms * 0.25)
        } else {
            backoff_ms
        };

        Duration::from_millis(final_ms as u64)
    }

    /// Check if more retries are allowed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}
