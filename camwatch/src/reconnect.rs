//! Reconnection budget and backoff

use std::time::Duration;
use tracing::{debug, info};

/// What to do after a connection failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then make attempt number `attempt`
    Retry {
        /// Attempt number, starting at 1
        attempt: u32,
        /// Backoff before the attempt
        delay: Duration,
    },
    /// A retry is already scheduled for this outage
    AlreadyScheduled,
    /// Budget used up
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
}

/// One attempt budget shared by every failure trigger of a session
///
/// Socket closure, peer failure and ICE failure all draw from the same
/// counter. The counter resets only when the peer connection reports
/// `connected`; a signaling channel that reopens does not reset it, so a
/// gateway that accepts the socket but never completes the peer connection
/// still exhausts the budget.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    attempts: u32,
    scheduled: bool,
}

impl ReconnectPolicy {
    /// Policy allowing `max_attempts` retries with linear backoff
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            attempts: 0,
            scheduled: false,
        }
    }

    /// Attempts made since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Maximum attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a retry is waiting on its backoff
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Backoff before attempt number `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Record a failure and decide the next step
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if self.scheduled {
            return ReconnectDecision::AlreadyScheduled;
        }
        if self.attempts >= self.max_attempts {
            info!("Reconnection budget of {} exhausted", self.max_attempts);
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        self.scheduled = true;
        let delay = self.delay_for(self.attempts);
        debug!(
            attempt = self.attempts,
            "Reconnection scheduled in {:?}", delay
        );
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// The scheduled attempt is starting; later failures count against it
    pub fn begin_attempt(&mut self) {
        self.scheduled = false;
    }

    /// Connection confirmed; the budget is restored
    pub fn on_connected(&mut self) {
        if self.attempts > 0 {
            info!("Reconnected after {} attempts", self.attempts);
        }
        self.attempts = 0;
        self.scheduled = false;
    }

    /// Forget all attempts
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.scheduled = false;
    }
}
