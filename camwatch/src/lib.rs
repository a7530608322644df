//! # camwatch - Live camera streams over WebRTC
//!
//! camwatch manages the live video connection to one security camera served
//! through a WebRTC gateway: the WebSocket signaling channel, a receive-only
//! peer connection, the server-side violence-detection toggle and stream
//! telemetry, with automatic reconnection when the link drops.
//!
//! ## Key Features
//!
//! - **One session, one camera**: every session owns its socket, peer and sink
//! - **Trickle ICE**: candidates flow both ways as soon as they are gathered
//! - **Detection control**: optimistic toggles with timeout rollback
//! - **Telemetry**: frame rate, bandwidth and drop counts, periodic heartbeats
//! - **Recovery**: one reconnection budget across socket, peer and ICE failures
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use camwatch::{StatusKind, StreamSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = StreamSession::builder("7")
//!         .signaling_url("ws://gateway:8000")
//!         .on_status(|event| {
//!             if event.kind == StatusKind::Session {
//!                 println!("Session {}", event.state);
//!             }
//!         })
//!         .on_detection(|event| {
//!             println!("Detection: {:.0}%", event.probability * 100.0);
//!         })
//!         .build()?;
//!
//!     session.connect(false).await?;
//!     session.toggle_detection(true).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     session.stop().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use camwatch_core::{
    CamwatchError, ConnectionState, DetectionState, IceState, PeerState, SessionState,
    SignalingState, Subsystem, SubsystemStates, VideoState,
};

pub use camwatch_signaling::{
    SignalingChannel, SignalingConnector, SignalingMessage, WebSocketConnector,
};

pub use camwatch_media::{
    FrameCounterSink, MediaPeer, PeerConfig, PeerFactory, PlaybackQuality, RemoteVideoTrack,
    TrackFeed, TurnServer, VideoEvent, VideoEventHandler, VideoPacket, VideoSink,
    WebRtcPeerFactory,
};

pub use camwatch_diagnostics::{init_logging, DebugLogger, SessionStatus, StreamStats};

// Public API modules
pub mod config;
pub mod detection;
pub mod event;
pub mod reconnect;
pub mod session;

// Re-export main API types
pub use config::SessionConfig;
pub use detection::{DetectionController, DetectionTransition, PendingToggle};
pub use event::{
    DetectionCallback, DetectionEvent, EventStream, StatusEvent, StatusKind, StatusObserver,
};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use session::{SessionBuilder, StreamSession};
