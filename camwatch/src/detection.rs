//! Detection toggle state machine
//!
//! ```text
//! idle --toggle(on)--> starting --status(active)--> active
//! active --toggle(off)--> stopping --status(inactive)--> idle
//! starting|stopping --timeout--> previous confirmed state
//! ```
//!
//! The controller is pure: the session sends the request and arms the
//! timeout, and feeds server status and timer expiry back in.

use crate::event::DetectionEvent;
use camwatch_core::{CamwatchError, DetectionState};
use camwatch_signaling::{DetectionEventMessage, DetectionStatusKind};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outstanding toggle request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingToggle {
    /// Requested detection state
    pub desired: bool,
    /// Confirmed state to fall back to on timeout
    pub previous: bool,
    /// Identifies the timer armed for this request
    pub token: u64,
}

/// Detection state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionTransition {
    /// State before the change
    pub from: DetectionState,
    /// State after the change
    pub to: DetectionState,
}

/// Tracks the server-side detection toggle
#[derive(Debug)]
pub struct DetectionController {
    state: DetectionState,
    active: bool,
    pending: Option<PendingToggle>,
    next_token: u64,
    timeout: Duration,
}

impl DetectionController {
    /// Idle controller using `timeout` for confirmations
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: DetectionState::Idle,
            active: false,
            pending: None,
            next_token: 0,
            timeout,
        }
    }

    /// Current toggle state
    pub fn state(&self) -> DetectionState {
        self.state
    }

    /// Whether detection is active or optimistically requested
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Outstanding request, if any
    pub fn pending(&self) -> Option<PendingToggle> {
        self.pending
    }

    /// Confirmation timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a toggle request
    ///
    /// Returns `None` when detection is already settled in the requested
    /// state. A request made while another is pending replaces it; the
    /// rollback target stays the last confirmed state.
    pub fn begin_toggle(&mut self, enable: bool) -> Option<(PendingToggle, DetectionTransition)> {
        if self.pending.is_none() && self.active == enable {
            debug!("Detection already {}", self.state);
            return None;
        }

        let previous = self.pending.map_or(self.active, |p| p.previous);
        self.next_token += 1;
        let pending = PendingToggle {
            desired: enable,
            previous,
            token: self.next_token,
        };
        self.pending = Some(pending);
        self.active = enable;

        let to = if enable {
            DetectionState::Starting
        } else {
            DetectionState::Stopping
        };
        Some((pending, self.move_to(to)))
    }

    /// Apply the authoritative state reported by the server
    pub fn apply_status(&mut self, status: DetectionStatusKind) -> Option<DetectionTransition> {
        let active = match status {
            DetectionStatusKind::Active => true,
            DetectionStatusKind::Inactive => false,
            DetectionStatusKind::Unknown => {
                warn!("Ignoring unknown detection status");
                return None;
            }
        };

        if let Some(pending) = self.pending.take() {
            if pending.desired != active {
                info!(
                    "Server reported detection {} while {} was requested",
                    if active { "active" } else { "inactive" },
                    if pending.desired { "start" } else { "stop" }
                );
            }
        }
        self.active = active;

        let to = if active {
            DetectionState::Active
        } else {
            DetectionState::Idle
        };
        if self.state == to {
            return None;
        }
        Some(self.move_to(to))
    }

    /// Handle expiry of the timer armed for `token`
    ///
    /// Rolls back and returns the timeout error only if `token` is still
    /// the outstanding request, so each request times out at most once.
    pub fn on_timeout(&mut self, token: u64) -> Option<(CamwatchError, DetectionTransition)> {
        let pending = match self.pending {
            Some(pending) if pending.token == token => pending,
            _ => return None,
        };

        let transition = self.roll_back(pending);
        warn!(
            "Detection toggle to {} not confirmed within {:?}, rolled back",
            pending.desired, self.timeout
        );
        Some((
            CamwatchError::DetectionToggleTimeout {
                desired: pending.desired,
                timeout: self.timeout,
            },
            transition,
        ))
    }

    /// Roll back a request that could not be sent
    pub fn abort(&mut self, token: u64) -> Option<DetectionTransition> {
        match self.pending {
            Some(pending) if pending.token == token => Some(self.roll_back(pending)),
            _ => None,
        }
    }

    /// Return to idle, dropping any pending request
    pub fn reset(&mut self) -> Option<DetectionTransition> {
        self.pending = None;
        self.active = false;
        if self.state == DetectionState::Idle {
            return None;
        }
        Some(self.move_to(DetectionState::Idle))
    }

    fn roll_back(&mut self, pending: PendingToggle) -> DetectionTransition {
        self.pending = None;
        self.active = pending.previous;
        let to = if pending.previous {
            DetectionState::Active
        } else {
            DetectionState::Idle
        };
        self.move_to(to)
    }

    fn move_to(&mut self, to: DetectionState) -> DetectionTransition {
        let transition = DetectionTransition {
            from: self.state,
            to,
        };
        self.state = to;
        transition
    }
}

impl DetectionEvent {
    /// Normalize a server message; missing values become zero
    pub fn from_message(camera_id: &str, message: DetectionEventMessage) -> Self {
        let probability = message
            .probability
            .filter(|p| p.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        Self {
            camera_id: camera_id.to_string(),
            probability,
            people_count: message.people_count.unwrap_or(0),
            message: message.message.unwrap_or_default(),
            received_at: Utc::now(),
        }
    }
}
