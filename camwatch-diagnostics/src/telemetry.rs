//! Stream telemetry: stats sampling and heartbeat snapshots
//!
//! The [`TelemetryMonitor`] owns two periodic tasks (stats sampling while
//! video plays, heartbeat for the whole session) and the pure derivation of
//! [`StreamStats`] from cumulative peer and sink counters.

use camwatch_core::{ConnectionState, SessionState, SubsystemStates};
use camwatch_media::{InboundVideoStats, PlaybackQuality};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default stats sampling period
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(2);

/// Default heartbeat period
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Derived stream statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    /// Frames per second over the last sampling window
    pub frame_rate: u32,
    /// Received bandwidth over the last sampling window, in kbps
    pub bandwidth_kbps: f64,
    /// RTP packets lost so far
    pub packets_lost: u64,
    /// Frames handled by the sink so far
    pub total_frames: u64,
    /// Frames dropped by the sink so far
    pub dropped_frames: u64,
    /// Frames received by the peer so far
    pub frames_received: u64,
    /// Bytes received by the peer so far
    pub bytes_received: u64,
    /// When the last sample was taken
    pub last_sample_at: Option<DateTime<Utc>>,
}

/// Result of one stats sample
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSample {
    /// Updated stats
    pub stats: StreamStats,
    /// Frames dropped since the previous sample
    pub newly_dropped: u64,
}

/// Aggregate session snapshot, reported on every heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Camera the session watches
    pub camera_id: String,
    /// Session client identifier
    pub client_id: String,
    /// Session lifecycle state
    pub session_state: SessionState,
    /// Peer connection summary
    pub connection_state: ConnectionState,
    /// Whether detection is active or requested
    pub detection_active: bool,
    /// Per-subsystem states
    pub subsystems: SubsystemStates,
    /// Reconnection attempts since the last successful connection
    pub reconnect_attempts: u32,
    /// Time since the session last connected, in seconds
    pub uptime_secs: f64,
    /// Latest stream statistics
    pub stats: StreamStats,
}

impl SessionStatus {
    /// JSON form used in status event details
    pub fn to_details(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Copy)]
struct Baseline {
    at: Instant,
    frames: u64,
    bytes: u64,
}

/// Derives stream stats and runs the periodic telemetry tasks
#[derive(Debug)]
pub struct TelemetryMonitor {
    stats_interval: Duration,
    heartbeat_interval: Duration,
    stats: StreamStats,
    baseline: Option<Baseline>,
    connected_at: Option<Instant>,
    stats_handle: Option<JoinHandle<()>>,
    heartbeat_handle: Option<JoinHandle<()>>,
}

impl Default for TelemetryMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_INTERVAL, DEFAULT_HEARTBEAT_INTERVAL)
    }
}

impl TelemetryMonitor {
    /// Create a monitor with the given periods
    pub fn new(stats_interval: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            stats_interval,
            heartbeat_interval,
            stats: StreamStats::default(),
            baseline: None,
            connected_at: None,
            stats_handle: None,
            heartbeat_handle: None,
        }
    }

    /// Latest derived stats
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Whether stats sampling is running
    pub fn is_sampling(&self) -> bool {
        self.stats_handle.is_some()
    }

    /// Whether the heartbeat is running
    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat_handle.is_some()
    }

    /// Mark the start of a connected period
    pub fn mark_connected(&mut self, now: Instant) {
        self.connected_at = Some(now);
    }

    /// When the current connected period started
    pub fn connected_at(&self) -> Option<Instant> {
        self.connected_at
    }

    /// Time since [`TelemetryMonitor::mark_connected`], zero if never connected
    pub fn uptime(&self, now: Instant) -> Duration {
        self.connected_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default()
    }

    /// Take one stats sample from cumulative counters
    ///
    /// The first sample after a reset only records a baseline. Counters
    /// that went backwards (a new peer) start a new baseline as well.
    pub fn sample(
        &mut self,
        now: Instant,
        inbound: Option<InboundVideoStats>,
        quality: Option<PlaybackQuality>,
    ) -> StatsSample {
        let mut newly_dropped = 0;
        if let Some(quality) = quality {
            newly_dropped = quality
                .dropped_frames
                .saturating_sub(self.stats.dropped_frames);
            self.stats.total_frames = quality.total_frames;
            self.stats.dropped_frames = quality.dropped_frames;
        }

        if let Some(inbound) = inbound {
            let previous = self.baseline.filter(|b| {
                inbound.frames_received >= b.frames && inbound.bytes_received >= b.bytes
            });

            if let Some(previous) = previous {
                let elapsed = now.saturating_duration_since(previous.at).as_secs_f64();
                if elapsed > 0.0 {
                    let frames = inbound.frames_received - previous.frames;
                    let bytes = inbound.bytes_received - previous.bytes;
                    self.stats.frame_rate = (frames as f64 / elapsed).round() as u32;
                    self.stats.bandwidth_kbps = (bytes as f64 * 8.0) / (elapsed * 1024.0);
                }
            }

            self.stats.packets_lost = inbound.packets_lost;
            self.stats.frames_received = inbound.frames_received;
            self.stats.bytes_received = inbound.bytes_received;
            self.baseline = Some(Baseline {
                at: now,
                frames: inbound.frames_received,
                bytes: inbound.bytes_received,
            });
        }

        if newly_dropped > 0 {
            warn!(
                "{} frames dropped since last sample ({} total)",
                newly_dropped, self.stats.dropped_frames
            );
        }

        self.stats.last_sample_at = Some(Utc::now());
        debug!(
            "Stats sample: {} fps, {:.1} kbps, {} lost",
            self.stats.frame_rate, self.stats.bandwidth_kbps, self.stats.packets_lost
        );

        StatsSample {
            stats: self.stats.clone(),
            newly_dropped,
        }
    }

    /// Start stats sampling; `tick` runs every period until it returns `false`
    pub fn start_sampling<F>(&mut self, tick: F)
    where
        F: Fn() -> bool + Send + 'static,
    {
        if self.stats_handle.is_some() {
            return; // Already sampling
        }
        self.stats_handle = Some(spawn_periodic(self.stats_interval, tick));
        debug!("Started stats sampling every {:?}", self.stats_interval);
    }

    /// Stop stats sampling and forget the sampling baseline
    pub fn stop_sampling(&mut self) {
        if let Some(handle) = self.stats_handle.take() {
            handle.abort();
            debug!("Stopped stats sampling");
        }
        self.baseline = None;
    }

    /// Start the heartbeat; `tick` runs every period until it returns `false`
    pub fn start_heartbeat<F>(&mut self, tick: F)
    where
        F: Fn() -> bool + Send + 'static,
    {
        if self.heartbeat_handle.is_some() {
            return;
        }
        self.heartbeat_handle = Some(spawn_periodic(self.heartbeat_interval, tick));
        info!("Started heartbeat every {:?}", self.heartbeat_interval);
    }

    /// Stop both tasks and clear all derived state
    pub fn stop(&mut self) {
        self.stop_sampling();
        if let Some(handle) = self.heartbeat_handle.take() {
            handle.abort();
            info!("Stopped heartbeat");
        }
        self.stats = StreamStats::default();
        self.connected_at = None;
    }
}

impl Drop for TelemetryMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.stats_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.heartbeat_handle.take() {
            handle.abort();
        }
    }
}

/// Run `tick` every `period`, first after one full period
fn spawn_periodic<F>(period: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn() -> bool + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !tick() {
                break; // Receiver gone
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn inbound(frames: u64, bytes: u64, lost: u64) -> Option<InboundVideoStats> {
        Some(InboundVideoStats {
            frames_received: frames,
            bytes_received: bytes,
            packets_received: frames,
            packets_lost: lost,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_rate_and_bandwidth() {
        let mut monitor = TelemetryMonitor::default();
        let start = Instant::now();

        let first = monitor.sample(start, inbound(100, 1_000_000, 0), None);
        assert_eq!(first.stats.frame_rate, 0);

        let second = monitor.sample(
            start + Duration::from_secs(2),
            inbound(148, 1_250_000, 3),
            None,
        );
        assert_eq!(second.stats.frame_rate, 24);
        assert_eq!(second.stats.bandwidth_kbps, 976.5625);
        assert_eq!(second.stats.packets_lost, 3);
        assert!(second.stats.last_sample_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_rate_is_rounded() {
        let mut monitor = TelemetryMonitor::default();
        let start = Instant::now();
        monitor.sample(start, inbound(0, 0, 0), None);
        let sample = monitor.sample(start + Duration::from_secs(3), inbound(50, 0, 0), None);
        assert_eq!(sample.stats.frame_rate, 17);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_reset_starts_new_baseline() {
        let mut monitor = TelemetryMonitor::default();
        let start = Instant::now();
        monitor.sample(start, inbound(500, 5_000_000, 0), None);
        let sample = monitor.sample(start + Duration::from_secs(2), inbound(10, 20_000, 0), None);
        // Previous rate stays until a full window on the new peer
        assert_eq!(sample.stats.frame_rate, 0);
        let sample = monitor.sample(start + Duration::from_secs(4), inbound(58, 20_000, 0), None);
        assert_eq!(sample.stats.frame_rate, 24);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_frame_warning() {
        let mut monitor = TelemetryMonitor::default();
        let now = Instant::now();
        let quality = |dropped| {
            Some(PlaybackQuality {
                total_frames: 200,
                dropped_frames: dropped,
            })
        };

        assert_eq!(monitor.sample(now, None, quality(0)).newly_dropped, 0);
        assert_eq!(monitor.sample(now, None, quality(4)).newly_dropped, 4);
        let sample = monitor.sample(now, None, quality(4));
        assert_eq!(sample.newly_dropped, 0);
        assert_eq!(sample.stats.dropped_frames, 4);
        assert_eq!(sample.stats.total_frames, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_tasks() {
        let mut monitor =
            TelemetryMonitor::new(Duration::from_secs(2), Duration::from_secs(5));
        let stats_ticks = Arc::new(AtomicU32::new(0));
        let heartbeats = Arc::new(AtomicU32::new(0));

        let counter = stats_ticks.clone();
        monitor.start_sampling(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });
        let counter = heartbeats.clone();
        monitor.start_heartbeat(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });
        assert!(monitor.is_sampling());
        assert!(monitor.is_heartbeat_running());

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(stats_ticks.load(Ordering::SeqCst), 5);
        assert_eq!(heartbeats.load(Ordering::SeqCst), 2);

        monitor.stop();
        assert!(!monitor.is_sampling());
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(stats_ticks.load(Ordering::SeqCst), 5);
        assert_eq!(heartbeats.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uptime() {
        let mut monitor = TelemetryMonitor::default();
        let now = Instant::now();
        assert_eq!(monitor.uptime(now), Duration::ZERO);
        monitor.mark_connected(now);
        assert_eq!(
            monitor.uptime(now + Duration::from_secs(42)),
            Duration::from_secs(42)
        );
        monitor.stop();
        assert_eq!(monitor.uptime(now + Duration::from_secs(50)), Duration::ZERO);
    }

    #[test]
    fn test_status_details() {
        let status = SessionStatus {
            camera_id: "7".to_string(),
            client_id: "c1".to_string(),
            session_state: SessionState::Active,
            connection_state: ConnectionState::Connected,
            detection_active: true,
            subsystems: SubsystemStates::default(),
            reconnect_attempts: 0,
            uptime_secs: 12.5,
            stats: StreamStats::default(),
        };
        let details = status.to_details();
        assert_eq!(details["sessionState"], "active");
        assert_eq!(details["connectionState"], "connected");
        assert_eq!(details["detectionActive"], true);
        assert_eq!(details["subsystems"]["websocket"], "disconnected");
        assert_eq!(details["stats"]["frameRate"], 0);
    }
}
