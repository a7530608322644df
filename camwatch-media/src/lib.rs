//! # camwatch media
//!
//! Receive-only WebRTC peer handling for camwatch camera sessions.
//! This crate owns the peer connection seam, the `webrtc`-backed peer,
//! offer/answer/ICE negotiation and the video sink the remote track is
//! bound to.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod peer;
pub mod sink;

// Re-export main types
pub use manager::PeerConnectionManager;
pub use peer::{
    InboundVideoStats, MediaPeer, PeerConfig, PeerEvent, PeerEventHandler, PeerFactory,
    TurnServer, WebRtcPeer, WebRtcPeerFactory, DEFAULT_STUN_SERVERS, MIN_STUN_SERVERS,
};
pub use sink::{
    FrameCounterSink, PlaybackQuality, RemoteVideoTrack, TrackFeed, VideoEvent,
    VideoEventHandler, VideoPacket, VideoSink, TRACK_QUEUE_CAPACITY,
};
