//! Session and subsystem state types
//!
//! Each subsystem of a stream session (signaling socket, peer connection,
//! video playback, detection) tracks its own state independently. The
//! session-level [`SessionState`] and the summary [`ConnectionState`] are
//! derived from them by the orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a whole stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, never connected
    Idle,
    /// First connection attempt in progress
    Connecting,
    /// Signaling open and SDP answer applied
    Active,
    /// Waiting for or running a reconnection attempt
    Reconnecting,
    /// Reconnection budget exhausted or initial connect failed
    Failed,
    /// Stopped by the caller
    Stopped,
}

impl SessionState {
    /// State name as reported to observers
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Failed => "failed",
            SessionState::Stopped => "stopped",
        }
    }

    /// Whether a new `connect` may be issued from this state
    pub fn can_connect(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Failed | SessionState::Stopped
        )
    }

    /// Whether the session currently owns live resources
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Active | SessionState::Reconnecting
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer-connection-level summary state exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No media path
    Disconnected,
    /// Negotiation or ICE in progress
    Connecting,
    /// Media path established
    Connected,
    /// Peer connection failed
    Error,
}

impl ConnectionState {
    /// State name as reported to observers
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

impl From<PeerState> for ConnectionState {
    fn from(state: PeerState) -> Self {
        match state {
            PeerState::New | PeerState::Connecting => ConnectionState::Connecting,
            PeerState::Connected => ConnectionState::Connected,
            PeerState::Failed => ConnectionState::Error,
            PeerState::Idle | PeerState::Disconnected | PeerState::Closed => {
                ConnectionState::Disconnected
            }
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signaling socket state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalingState {
    /// No socket
    Disconnected,
    /// Socket dialing
    Connecting,
    /// Socket open
    Connected,
    /// Socket closed abnormally or failed to open
    Error,
    /// Reconnection abandoned
    Failed,
}

impl SignalingState {
    /// State name as reported to observers
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalingState::Disconnected => "disconnected",
            SignalingState::Connecting => "connecting",
            SignalingState::Connected => "connected",
            SignalingState::Error => "error",
            SignalingState::Failed => "failed",
        }
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WebRTC peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    /// No peer connection exists
    Idle,
    /// Peer connection created, not negotiating yet
    New,
    /// Negotiation or connectivity checks in progress
    Connecting,
    /// Media path established
    Connected,
    /// Media path lost, may recover
    Disconnected,
    /// Media path failed permanently
    Failed,
    /// Peer connection closed
    Closed,
}

impl PeerState {
    /// State name as reported to observers
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerState::Idle => "idle",
            PeerState::New => "new",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ICE transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceState {
    /// Gathering not started
    New,
    /// Connectivity checks running
    Checking,
    /// A working candidate pair was found
    Connected,
    /// Checks finished
    Completed,
    /// Connectivity lost
    Disconnected,
    /// No working candidate pair
    Failed,
    /// ICE agent shut down
    Closed,
}

impl IceState {
    /// State name as reported to observers
    pub fn as_str(&self) -> &'static str {
        match self {
            IceState::New => "new",
            IceState::Checking => "checking",
            IceState::Connected => "connected",
            IceState::Completed => "completed",
            IceState::Disconnected => "disconnected",
            IceState::Failed => "failed",
            IceState::Closed => "closed",
        }
    }
}

impl fmt::Display for IceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video sink playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoState {
    /// No stream bound
    Idle,
    /// Stream bound, waiting for data
    Waiting,
    /// Frames are being rendered
    Playing,
    /// Playback paused
    Paused,
    /// Playback stalled on missing data
    Stalled,
    /// Stream ended
    Ended,
    /// Playback failed
    Error,
}

impl VideoState {
    /// State name as reported to observers
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoState::Idle => "idle",
            VideoState::Waiting => "waiting",
            VideoState::Playing => "playing",
            VideoState::Paused => "paused",
            VideoState::Stalled => "stalled",
            VideoState::Ended => "ended",
            VideoState::Error => "error",
        }
    }
}

impl fmt::Display for VideoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side detection toggle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionState {
    /// Detection off
    Idle,
    /// Enable requested, waiting for confirmation
    Starting,
    /// Detection confirmed on
    Active,
    /// Disable requested, waiting for confirmation
    Stopping,
}

impl DetectionState {
    /// State name as reported to observers
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionState::Idle => "idle",
            DetectionState::Starting => "starting",
            DetectionState::Active => "active",
            DetectionState::Stopping => "stopping",
        }
    }

    /// Whether a toggle is waiting for server confirmation
    pub fn is_pending(&self) -> bool {
        matches!(self, DetectionState::Starting | DetectionState::Stopping)
    }
}

impl fmt::Display for DetectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subsystems tracked by a stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    /// Signaling socket
    Websocket,
    /// Peer connection
    Webrtc,
    /// Video sink playback
    Video,
    /// Detection toggle
    Detection,
}

impl Subsystem {
    /// Subsystem name as reported to observers
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Websocket => "websocket",
            Subsystem::Webrtc => "webrtc",
            Subsystem::Video => "video",
            Subsystem::Detection => "detection",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Independent state of every subsystem in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsystemStates {
    /// Signaling socket state
    pub websocket: SignalingState,
    /// Peer connection state
    pub webrtc: PeerState,
    /// Video playback state
    pub video: VideoState,
    /// Detection toggle state
    pub detection: DetectionState,
}

impl SubsystemStates {
    /// Disconnected/idle baseline used at construction and after teardown
    pub fn baseline() -> Self {
        Self {
            websocket: SignalingState::Disconnected,
            webrtc: PeerState::Idle,
            video: VideoState::Idle,
            detection: DetectionState::Idle,
        }
    }

    /// State string of a single subsystem
    pub fn get(&self, subsystem: Subsystem) -> &'static str {
        match subsystem {
            Subsystem::Websocket => self.websocket.as_str(),
            Subsystem::Webrtc => self.webrtc.as_str(),
            Subsystem::Video => self.video.as_str(),
            Subsystem::Detection => self.detection.as_str(),
        }
    }

    /// Subsystem name to state string mapping
    pub fn as_map(&self) -> BTreeMap<&'static str, &'static str> {
        [
            Subsystem::Websocket,
            Subsystem::Webrtc,
            Subsystem::Video,
            Subsystem::Detection,
        ]
        .into_iter()
        .map(|s| (s.as_str(), self.get(s)))
        .collect()
    }

    /// True when no subsystem is left in an in-progress or live state
    pub fn is_quiescent(&self) -> bool {
        !matches!(
            self.websocket,
            SignalingState::Connecting | SignalingState::Connected
        ) && !matches!(
            self.webrtc,
            PeerState::New | PeerState::Connecting | PeerState::Connected
        ) && !matches!(
            self.video,
            VideoState::Waiting | VideoState::Playing | VideoState::Stalled
        ) && self.detection == DetectionState::Idle
    }
}

impl Default for SubsystemStates {
    fn default() -> Self {
        Self::baseline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_is_quiescent() {
        let states = SubsystemStates::baseline();
        assert!(states.is_quiescent());

        let map = states.as_map();
        assert_eq!(map.len(), 4);
        assert_eq!(map["websocket"], "disconnected");
        assert_eq!(map["webrtc"], "idle");
        assert_eq!(map["video"], "idle");
        assert_eq!(map["detection"], "idle");
    }

    #[test]
    fn test_live_states_are_not_quiescent() {
        let mut states = SubsystemStates::baseline();
        states.detection = DetectionState::Starting;
        assert!(!states.is_quiescent());

        let mut states = SubsystemStates::baseline();
        states.websocket = SignalingState::Connecting;
        assert!(!states.is_quiescent());

        let mut states = SubsystemStates::baseline();
        states.webrtc = PeerState::Failed;
        states.websocket = SignalingState::Failed;
        assert!(states.is_quiescent());
    }

    #[test]
    fn test_connection_state_from_peer_state() {
        assert_eq!(
            ConnectionState::from(PeerState::Connecting),
            ConnectionState::Connecting
        );
        assert_eq!(
            ConnectionState::from(PeerState::Connected),
            ConnectionState::Connected
        );
        assert_eq!(ConnectionState::from(PeerState::Failed), ConnectionState::Error);
        assert_eq!(
            ConnectionState::from(PeerState::Closed),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_session_state_transitions_allowed() {
        assert!(SessionState::Idle.can_connect());
        assert!(SessionState::Failed.can_connect());
        assert!(SessionState::Stopped.can_connect());
        assert!(!SessionState::Active.can_connect());
        assert!(!SessionState::Reconnecting.can_connect());
        assert!(SessionState::Reconnecting.is_live());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&SubsystemStates::baseline()).unwrap();
        assert!(json.contains("\"websocket\":\"disconnected\""));
        assert!(json.contains("\"detection\":\"idle\""));

        let state: DetectionState = serde_json::from_str("\"stopping\"").unwrap();
        assert_eq!(state, DetectionState::Stopping);
        assert!(state.is_pending());
    }
}
