//! Configuration types and defaults

use camwatch_core::CamwatchError;
use camwatch_media::PeerConfig;
use std::time::Duration;

/// Session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Gateway base URL, e.g. `ws://gateway:8000`
    pub signaling_url: String,
    /// Time allowed for the signaling socket to become ready
    pub open_timeout: Duration,
    /// Time allowed for the server to confirm a detection toggle
    pub detection_toggle_timeout: Duration,
    /// Stats sampling period while video plays
    pub stats_interval: Duration,
    /// Heartbeat period
    pub heartbeat_interval: Duration,
    /// Reconnection attempts before the session fails
    pub max_reconnect_attempts: u32,
    /// Backoff unit; attempt `n` waits `n` times this long
    pub reconnect_base_delay: Duration,
    /// ICE configuration of the peer connection
    pub peer: PeerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8000".to_string(),
            open_timeout: Duration::from_secs(10),
            detection_toggle_timeout: Duration::from_secs(5),
            stats_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(5),
            max_reconnect_attempts: 3,
            reconnect_base_delay: Duration::from_secs(2),
            peer: PeerConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Defaults pointed at the given gateway
    pub fn for_gateway(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            ..Self::default()
        }
    }

    /// Gateway on the local network: short waits, quick retries
    pub fn local_network(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            open_timeout: Duration::from_secs(3),
            reconnect_base_delay: Duration::from_secs(1),
            ..Self::default()
        }
    }

    /// Gateway behind a lossy or cellular link: longer waits, more retries
    pub fn unreliable_network(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            open_timeout: Duration::from_secs(20),
            detection_toggle_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(10),
            max_reconnect_attempts: 6,
            reconnect_base_delay: Duration::from_secs(3),
            ..Self::default()
        }
    }

    /// Check every field
    pub fn validate(&self) -> Result<(), CamwatchError> {
        if !(self.signaling_url.starts_with("ws://") || self.signaling_url.starts_with("wss://"))
        {
            return Err(invalid(
                "signaling_url",
                format!("{} is not a ws:// or wss:// URL", self.signaling_url),
            ));
        }

        for (field, value) in [
            ("open_timeout", self.open_timeout),
            ("detection_toggle_timeout", self.detection_toggle_timeout),
            ("stats_interval", self.stats_interval),
            ("heartbeat_interval", self.heartbeat_interval),
        ] {
            if value.is_zero() {
                return Err(invalid(field, "must be greater than zero".to_string()));
            }
        }

        self.peer.validate()
    }
}

fn invalid(field: &str, reason: String) -> CamwatchError {
    CamwatchError::InvalidConfiguration {
        field: field.to_string(),
        reason,
    }
}
