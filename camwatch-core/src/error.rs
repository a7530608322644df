//! Error types for camwatch

use std::time::Duration;
use thiserror::Error;

/// Main error type for camwatch operations
#[derive(Error, Debug)]
pub enum CamwatchError {
    /// Signaling socket did not become ready in time
    #[error("Signaling channel to {url} not ready after {timeout:?}")]
    SignalingTimeout {
        /// Signaling endpoint that was dialed
        url: String,
        /// Open timeout that elapsed
        timeout: Duration,
    },

    /// Send attempted while the signaling socket is not open
    #[error("Signaling channel not ready (state: {state})")]
    SignalingNotReady {
        /// Channel state at the time of the send
        state: String,
    },

    /// SDP answer from the server could not be applied
    #[error("Invalid SDP answer: {reason}")]
    InvalidAnswer {
        /// Reason the answer was rejected
        reason: String,
    },

    /// Video sink refused to start playback
    #[error("Video playback failed: {reason}")]
    VideoPlaybackError {
        /// Reason reported by the sink
        reason: String,
    },

    /// Detection toggle was never confirmed by the server
    #[error("Detection toggle to {desired} not confirmed after {timeout:?}")]
    DetectionToggleTimeout {
        /// Requested detection state
        desired: bool,
        /// Confirmation timeout that elapsed
        timeout: Duration,
    },

    /// Reconnection budget used up
    #[error("Reconnection abandoned after {attempts} attempts")]
    ReconnectionExhausted {
        /// Number of attempts made
        attempts: u32,
    },

    /// Invalid state error
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration {
        /// Offending configuration field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Signaling transport failure
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// WebRTC peer connection failure
    #[error("Peer connection error: {reason}")]
    Peer {
        /// Reason for peer error
        reason: String,
    },

    /// Protocol error
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message
        message: String,
    },

    /// Error reported by the signaling server
    #[error("Server error: {message}")]
    Server {
        /// Message sent by the server
        message: String,
    },

    /// Invalid message format
    #[error("Invalid message format: {message}, error: {source}")]
    InvalidMessage {
        /// Invalid message content
        message: String,
        /// Parsing error
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Session is shutting down and can not take the request
    #[error("Session closed")]
    SessionClosed,
}

impl CamwatchError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            CamwatchError::SignalingTimeout { .. } => "SIGNALING_TIMEOUT".to_string(),
            CamwatchError::SignalingNotReady { .. } => "SIGNALING_NOT_READY".to_string(),
            CamwatchError::InvalidAnswer { .. } => "INVALID_ANSWER".to_string(),
            CamwatchError::VideoPlaybackError { .. } => "VIDEO_PLAYBACK_ERROR".to_string(),
            CamwatchError::DetectionToggleTimeout { .. } => {
                "DETECTION_TOGGLE_TIMEOUT".to_string()
            }
            CamwatchError::ReconnectionExhausted { .. } => "RECONNECTION_EXHAUSTED".to_string(),
            CamwatchError::InvalidState { .. } => "INVALID_STATE".to_string(),
            CamwatchError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION".to_string(),
            CamwatchError::Transport { .. } => "TRANSPORT_ERROR".to_string(),
            CamwatchError::Peer { .. } => "PEER_ERROR".to_string(),
            CamwatchError::Protocol { .. } => "PROTOCOL_ERROR".to_string(),
            CamwatchError::Server { .. } => "SERVER_ERROR".to_string(),
            CamwatchError::InvalidMessage { .. } => "INVALID_MESSAGE".to_string(),
            CamwatchError::SessionClosed => "SESSION_CLOSED".to_string(),
        }
    }

    /// Whether the error is a warning that leaves the session running
    ///
    /// Structural failures (exhausted reconnection, closed session, bad
    /// configuration) return `false`.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CamwatchError::SignalingNotReady { .. }
                | CamwatchError::InvalidAnswer { .. }
                | CamwatchError::VideoPlaybackError { .. }
                | CamwatchError::DetectionToggleTimeout { .. }
                | CamwatchError::InvalidMessage { .. }
                | CamwatchError::Server { .. }
        )
    }
}
