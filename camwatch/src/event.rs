//! Status and detection events surfaced to the application

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Category of a status event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Session lifecycle transition
    Session,
    /// Signaling socket state
    Websocket,
    /// Peer connection state
    Webrtc,
    /// ICE connection state
    Ice,
    /// Video playback state
    Video,
    /// Detection toggle state
    Detection,
    /// Stats sample
    Stats,
    /// Periodic aggregate snapshot
    Heartbeat,
    /// Reconnection scheduled
    Reconnect,
    /// Non-fatal problem
    Warning,
    /// Structural failure
    Error,
}

impl StatusKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Session => "session",
            StatusKind::Websocket => "websocket",
            StatusKind::Webrtc => "webrtc",
            StatusKind::Ice => "ice",
            StatusKind::Video => "video",
            StatusKind::Detection => "detection",
            StatusKind::Stats => "stats",
            StatusKind::Heartbeat => "heartbeat",
            StatusKind::Reconnect => "reconnect",
            StatusKind::Warning => "warning",
            StatusKind::Error => "error",
        }
    }

    /// Check if this kind reports a subsystem state change
    pub fn is_subsystem(&self) -> bool {
        matches!(
            self,
            StatusKind::Websocket | StatusKind::Webrtc | StatusKind::Video | StatusKind::Detection
        )
    }
}

/// Event delivered to the session observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// Event category
    pub kind: StatusKind,
    /// New state, or a short code for warnings and errors
    pub state: String,
    /// Kind-specific details
    pub details: serde_json::Value,
    /// When the event was raised
    pub timestamp: DateTime<Utc>,
    /// Session client identifier
    pub client_id: String,
}

impl StatusEvent {
    /// Event without details
    pub fn new(kind: StatusKind, state: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            kind,
            state: state.into(),
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
            client_id: client_id.into(),
        }
    }

    /// Attach details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Check if this is a warning event
    pub fn is_warning(&self) -> bool {
        self.kind == StatusKind::Warning
    }

    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        self.kind == StatusKind::Error
    }
}

/// Observer receiving every status event
pub type StatusObserver = Arc<dyn Fn(StatusEvent) + Send + Sync>;

/// Normalized detection result from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    /// Camera the detection belongs to
    pub camera_id: String,
    /// Violence probability in `[0, 1]`
    pub probability: f64,
    /// People in frame
    pub people_count: u32,
    /// Server-provided description
    pub message: String,
    /// When the event was received
    pub received_at: DateTime<Utc>,
}

/// Callback receiving detection events
pub type DetectionCallback = Arc<dyn Fn(DetectionEvent) + Send + Sync>;

/// Async stream of status events
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<StatusEvent>,
}

impl EventStream {
    /// Create an observer and the stream it feeds
    pub fn channel() -> (StatusObserver, Self) {
        let (tx, receiver) = mpsc::unbounded_channel();
        let observer: StatusObserver = Arc::new(move |event: StatusEvent| {
            let _ = tx.send(event);
        });
        (observer, Self { receiver })
    }

    /// Get the next event from the stream
    pub async fn next(&mut self) -> Option<StatusEvent> {
        self.receiver.recv().await
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Option<StatusEvent> {
        self.receiver.try_recv().ok()
    }

    /// Next event matching `filter`, skipping the rest
    pub async fn next_matching<F>(&mut self, filter: F) -> Option<StatusEvent>
    where
        F: Fn(&StatusEvent) -> bool,
    {
        while let Some(event) = self.receiver.recv().await {
            if filter(&event) {
                return Some(event);
            }
        }
        None
    }

    /// Close the event stream
    pub fn close(&mut self) {
        self.receiver.close();
    }
}
