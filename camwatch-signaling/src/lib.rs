//! # camwatch signaling
//!
//! Client-side signaling for camwatch camera sessions.
//! Carries SDP offers/answers, trickle ICE and detection control messages
//! between one session and the camera gateway over a WebSocket.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod protocol;
pub mod transport;

// Re-export main types
pub use channel::{
    signaling_url, ChannelEvent, ChannelEventHandler, CloseInfo, LinkEvent, LinkFrame,
    SignalingChannel, SignalingConnector, SignalingLink, DEFAULT_OPEN_TIMEOUT,
};
pub use protocol::{
    DetectionEventMessage, DetectionRequest, DetectionStatus, DetectionStatusKind, IceCandidate,
    IceCandidateMessage, SdpAnswer, SdpOffer, ServerError, SignalingMessage,
};
pub use transport::WebSocketConnector;
