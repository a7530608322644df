//! # camwatch diagnostics
//!
//! Telemetry and logging for camwatch camera sessions.
//! Derives frame rate, bandwidth and drop counts from peer and sink
//! counters, runs the periodic stats and heartbeat tasks, and installs the
//! structured logging subscriber.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod debug_logger;
pub mod telemetry;

// Re-export main types
pub use debug_logger::{init_logging, DebugLogger, DEFAULT_DIRECTIVE};
pub use telemetry::{
    SessionStatus, StatsSample, StreamStats, TelemetryMonitor, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_STATS_INTERVAL,
};
