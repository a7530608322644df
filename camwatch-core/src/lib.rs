//! # camwatch core
//!
//! Error and state types shared by every camwatch crate.
//! The session, signaling and media crates all report through these types so
//! observers see one vocabulary for subsystem state.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod state;

// Re-export main types
pub use error::CamwatchError;
pub use state::{
    ConnectionState, DetectionState, IceState, PeerState, SessionState, SignalingState,
    Subsystem, SubsystemStates, VideoState,
};
