//! Signaling protocol messages
//!
//! Every message is a JSON object tagged by `type`. Some gateways tag with
//! `tipo` instead; [`SignalingMessage::parse`] accepts both.

use camwatch_core::CamwatchError;
use serde::{Deserialize, Serialize};

/// SDP offer sent by the client to open a camera stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpOffer {
    /// SDP content
    pub sdp: String,
    /// Client ID for routing the answer
    pub client_id: String,
    /// Camera to stream from
    pub camera_id: String,
    /// Whether detection should start together with the stream
    pub detection_requested: bool,
}

/// SDP answer from the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpAnswer {
    /// SDP content, absent on malformed answers
    #[serde(default)]
    pub sdp: Option<String>,
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with no media section hints
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    /// Attach the media section the candidate belongs to
    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }

    /// End-of-candidates markers carry an empty candidate line
    pub fn is_empty(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// Trickle ICE message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateMessage {
    /// Candidate, `None` when the peer signals end of candidates
    #[serde(default)]
    pub candidate: Option<IceCandidate>,
    /// Client the candidate is addressed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
}

/// Detection start/stop request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRequest {
    /// Camera the detector runs on
    pub camera_id: String,
    /// Requesting client
    pub client_id: String,
    /// Requested detection state
    pub desired: bool,
}

/// Detection state reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStatusKind {
    /// Detector running
    Active,
    /// Detector stopped
    Inactive,
    /// Any state this client does not understand
    #[serde(other)]
    Unknown,
}

/// Authoritative detection state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionStatus {
    /// Reported state
    pub state: DetectionStatusKind,
}

/// Raw detection event as sent by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEventMessage {
    /// Violence probability in [0, 1]
    #[serde(default)]
    pub probability: Option<f64>,
    /// Number of people in frame
    #[serde(default)]
    pub people_count: Option<u32>,
    /// Free-form description
    #[serde(default)]
    pub message: Option<String>,
}

/// Error reported by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error message
    #[serde(default)]
    pub message: String,
}

/// Signaling messages exchanged with the camera gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// SDP offer from the client
    Offer(SdpOffer),
    /// SDP answer from the gateway
    Answer(SdpAnswer),
    /// Trickle ICE candidate, either direction
    IceCandidate(IceCandidateMessage),
    /// Enable detection
    StartDetection(DetectionRequest),
    /// Disable detection
    StopDetection(DetectionRequest),
    /// Detection state confirmation
    DetectionStatus(DetectionStatus),
    /// Detection result
    DetectionEvent(DetectionEventMessage),
    /// Gateway error
    Error(ServerError),
}

impl SignalingMessage {
    /// Wire tag of the message
    pub fn message_type(&self) -> &'static str {
        match self {
            SignalingMessage::Offer(_) => "offer",
            SignalingMessage::Answer(_) => "answer",
            SignalingMessage::IceCandidate(_) => "ice_candidate",
            SignalingMessage::StartDetection(_) => "start_detection",
            SignalingMessage::StopDetection(_) => "stop_detection",
            SignalingMessage::DetectionStatus(_) => "detection_status",
            SignalingMessage::DetectionEvent(_) => "detection_event",
            SignalingMessage::Error(_) => "error",
        }
    }

    /// Build the start or stop request for a desired detection state
    pub fn detection_request(camera_id: &str, client_id: &str, desired: bool) -> Self {
        let request = DetectionRequest {
            camera_id: camera_id.to_string(),
            client_id: client_id.to_string(),
            desired,
        };
        if desired {
            SignalingMessage::StartDetection(request)
        } else {
            SignalingMessage::StopDetection(request)
        }
    }

    /// Parse an inbound text frame, accepting `tipo` as the tag field
    pub fn parse(text: &str) -> Result<Self, CamwatchError> {
        let mut value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| CamwatchError::InvalidMessage {
                message: text.to_string(),
                source: e.into(),
            })?;

        if let Some(object) = value.as_object_mut() {
            if !object.contains_key("type") {
                if let Some(tag) = object.remove("tipo") {
                    object.insert("type".to_string(), tag);
                }
            }
        }

        serde_json::from_value(value).map_err(|e| CamwatchError::InvalidMessage {
            message: text.to_string(),
            source: e.into(),
        })
    }

    /// Serialize for the wire
    pub fn to_json(&self) -> Result<String, CamwatchError> {
        serde_json::to_string(self).map_err(|e| CamwatchError::Protocol {
            message: format!("Failed to serialize {}: {}", self.message_type(), e),
        })
    }
}
