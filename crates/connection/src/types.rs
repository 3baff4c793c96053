//! Public types for the push connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleetlive_protocol::DEFAULT_MAX_MESSAGE_SIZE;

use crate::backoff::BackoffConfig;
use crate::error::LiveError;

/// Lifecycle state of a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Never started.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// The transport reported open.
    Connected,
    /// Connection lost; waiting out the backoff delay.
    Reconnecting,
    /// Stopped by the owner. Stays here until started again.
    Disconnected,
}

impl ConnectionStatus {
    /// Returns `true` while the manager is trying to be, or is, connected.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::Connected
                | ConnectionStatus::Reconnecting
        )
    }

    /// Three-state view for the UI indicator.
    pub fn indicator(self) -> StatusIndicator {
        match self {
            ConnectionStatus::Connected => StatusIndicator::Live,
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => {
                StatusIndicator::Reconnecting
            }
            ConnectionStatus::Idle | ConnectionStatus::Disconnected => StatusIndicator::Offline,
        }
    }
}

/// What the dashboard's connection badge shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusIndicator {
    Live,
    Reconnecting,
    Offline,
}

/// Tunables for one [`ConnectionManager`](crate::ConnectionManager).
///
/// All fields have defaults, so a partial JSON object deserializes fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Delay before the first reconnect attempt.
    pub base_delay_ms: u64,
    /// Backoff cap.
    pub max_delay_ms: u64,
    /// Relative jitter applied to each delay, in `[0, 1)`.
    pub jitter: f64,
    /// Continuous connected time after which the retry streak resets.
    pub stability_window_ms: u64,
    /// Inbound messages larger than this are dropped.
    pub max_message_bytes: usize,
    /// Silence after which a live stream is treated as dead. Also bounds
    /// the wait for response headers. Keep it above the server's heartbeat
    /// interval.
    pub idle_timeout_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: 0.2,
            stability_window_ms: 60_000,
            max_message_bytes: DEFAULT_MAX_MESSAGE_SIZE,
            idle_timeout_ms: 45_000,
        }
    }
}

impl LiveConfig {
    /// Checks that the values describe a usable backoff.
    pub fn validate(&self) -> Result<(), LiveError> {
        if self.base_delay_ms == 0 {
            return Err(LiveError::InvalidConfig(
                "base_delay_ms must be greater than zero".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(LiveError::InvalidConfig(format!(
                "max_delay_ms ({}) is below base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(LiveError::InvalidConfig(format!(
                "jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        if self.max_message_bytes == 0 {
            return Err(LiveError::InvalidConfig(
                "max_message_bytes must be greater than zero".into(),
            ));
        }
        if self.idle_timeout_ms == 0 {
            return Err(LiveError::InvalidConfig(
                "idle_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Backoff parameters derived from this config.
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
