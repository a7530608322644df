//! Video sink seam
//!
//! The remote camera track is handed to a caller-supplied [`VideoSink`].
//! Sinks report playback through [`VideoEvent`]s, which the session maps to
//! the `video` subsystem state with [`VideoEvent::video_state`].

use async_trait::async_trait;
use bytes::Bytes;
use camwatch_core::{CamwatchError, VideoState};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Capacity of the packet queue between the RTP reader and the sink
pub const TRACK_QUEUE_CAPACITY: usize = 512;

/// One RTP payload of the remote video track
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPacket {
    /// Raw RTP payload (not depacketized)
    pub payload: Bytes,
    /// RTP timestamp
    pub timestamp: u32,
    /// RTP sequence number
    pub sequence: u16,
    /// Marker bit, set on the last packet of a frame
    pub marker: bool,
}

/// Remote video track bound to a sink
pub struct RemoteVideoTrack {
    /// Track identifier
    pub id: String,
    /// Media stream identifier
    pub stream_id: String,
    /// Negotiated codec MIME type
    pub mime_type: String,
    /// Packets read from the track
    pub packets: mpsc::Receiver<VideoPacket>,
    dropped: Arc<AtomicU64>,
}

impl RemoteVideoTrack {
    /// Create a track together with the feed that fills its packet queue
    pub fn channel(
        id: impl Into<String>,
        stream_id: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> (TrackFeed, RemoteVideoTrack) {
        let (tx, rx) = mpsc::channel(TRACK_QUEUE_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));
        let feed = TrackFeed {
            packets: tx,
            dropped: dropped.clone(),
            damaged: false,
        };
        let track = RemoteVideoTrack {
            id: id.into(),
            stream_id: stream_id.into(),
            mime_type: mime_type.into(),
            packets: rx,
            dropped,
        };
        (feed, track)
    }

    /// Counter of frames lost in the packet queue, shared with the feed
    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }
}

impl fmt::Debug for RemoteVideoTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteVideoTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Producer half of a [`RemoteVideoTrack`] queue
///
/// Never blocks the RTP reader: when the queue is full the packet is
/// discarded and the frame it belongs to is counted as dropped once its
/// last packet (marker bit) goes by.
pub struct TrackFeed {
    packets: mpsc::Sender<VideoPacket>,
    dropped: Arc<AtomicU64>,
    damaged: bool,
}

impl fmt::Debug for TrackFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackFeed")
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .field("damaged", &self.damaged)
            .finish()
    }
}

impl TrackFeed {
    /// Queue a packet for the sink; `false` once the sink released the track
    pub fn forward(&mut self, packet: VideoPacket) -> bool {
        let marker = packet.marker;
        match self.packets.try_send(packet) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("Sink queue full, packet dropped");
                self.damaged = true;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return false,
        }
        if marker && self.damaged {
            self.damaged = false;
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Frames dropped so far
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Playback-quality counters read from the sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackQuality {
    /// Frames presented or decoded so far
    pub total_frames: u64,
    /// Frames dropped so far
    pub dropped_frames: u64,
}

/// Playback event reported by a sink
#[derive(Debug, Clone, PartialEq)]
pub enum VideoEvent {
    /// Frames are being presented
    Playing,
    /// Playback paused
    Paused,
    /// Waiting for data
    Waiting,
    /// Data stopped arriving
    Stalled,
    /// Track ended
    Ended,
    /// Playback error
    Error(String),
}

impl VideoEvent {
    /// Video subsystem state this event moves to
    pub fn video_state(&self) -> VideoState {
        match self {
            VideoEvent::Playing => VideoState::Playing,
            VideoEvent::Paused => VideoState::Paused,
            VideoEvent::Waiting => VideoState::Waiting,
            VideoEvent::Stalled => VideoState::Stalled,
            VideoEvent::Ended => VideoState::Ended,
            VideoEvent::Error(_) => VideoState::Error,
        }
    }

    /// Event name as reported in status details
    pub fn name(&self) -> &'static str {
        match self {
            VideoEvent::Playing => "playing",
            VideoEvent::Paused => "paused",
            VideoEvent::Waiting => "waiting",
            VideoEvent::Stalled => "stalled",
            VideoEvent::Ended => "ended",
            VideoEvent::Error(_) => "error",
        }
    }
}

/// Callback receiving sink playback events
pub type VideoEventHandler = Arc<dyn Fn(VideoEvent) + Send + Sync>;

/// Consumer of the remote camera track
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Bind the remote track; replaces any previously attached track
    fn attach(&self, track: RemoteVideoTrack, events: VideoEventHandler);

    /// Start playback of the attached track
    async fn play(&self) -> Result<(), CamwatchError>;

    /// Current playback-quality counters, if the sink tracks them
    fn playback_quality(&self) -> Option<PlaybackQuality>;

    /// Stop playback and release the attached track
    fn release(&self);
}

/// Sink that drains the track and counts complete frames
///
/// Useful for headless monitoring: no decoding happens, frames are counted
/// from the RTP marker bit and frames that lost packets in the track queue
/// count as dropped frames.
#[derive(Default)]
pub struct FrameCounterSink {
    inner: Arc<CounterState>,
    track: Mutex<Option<RemoteVideoTrack>>,
    events: Mutex<Option<VideoEventHandler>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct CounterState {
    total_frames: AtomicU64,
    // Drops of previously attached tracks
    dropped_before: AtomicU64,
    dropped: Mutex<Option<Arc<AtomicU64>>>,
    playing: AtomicBool,
}

impl CounterState {
    fn dropped_frames(&self) -> u64 {
        let current = self
            .dropped
            .lock()
            .as_ref()
            .map_or(0, |dropped| dropped.load(Ordering::Relaxed));
        self.dropped_before.load(Ordering::Relaxed) + current
    }

    fn track_dropped(&self, counter: Option<Arc<AtomicU64>>) {
        let previous = std::mem::replace(&mut *self.dropped.lock(), counter);
        if let Some(previous) = previous {
            self.dropped_before
                .fetch_add(previous.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for FrameCounterSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCounterSink")
            .field("total_frames", &self.inner.total_frames.load(Ordering::Relaxed))
            .field("playing", &self.inner.playing.load(Ordering::Relaxed))
            .finish()
    }
}

impl FrameCounterSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    fn stop_drain(&self) {
        if let Some(drain) = self.drain.lock().take() {
            drain.abort();
        }
        self.inner.playing.store(false, Ordering::Relaxed);
    }
}

#[async_trait]
impl VideoSink for FrameCounterSink {
    fn attach(&self, track: RemoteVideoTrack, events: VideoEventHandler) {
        self.stop_drain();
        debug!("Attaching track {} ({})", track.id, track.mime_type);
        events(VideoEvent::Waiting);
        self.inner.track_dropped(Some(track.drop_counter()));
        *self.track.lock() = Some(track);
        *self.events.lock() = Some(events);
    }

    async fn play(&self) -> Result<(), CamwatchError> {
        let track = self.track.lock().take();
        let events = self.events.lock().clone();
        let (mut track, events) = match (track, events) {
            (Some(track), Some(events)) => (track, events),
            _ => {
                return Err(CamwatchError::VideoPlaybackError {
                    reason: "no track attached".to_string(),
                })
            }
        };

        info!("Starting playback of track {}", track.id);
        let state = self.inner.clone();
        let drain = tokio::spawn(async move {
            while let Some(packet) = track.packets.recv().await {
                if !packet.marker {
                    continue;
                }
                state.total_frames.fetch_add(1, Ordering::Relaxed);
                if !state.playing.swap(true, Ordering::Relaxed) {
                    events(VideoEvent::Playing);
                }
            }
            state.playing.store(false, Ordering::Relaxed);
            events(VideoEvent::Ended);
        });
        *self.drain.lock() = Some(drain);
        Ok(())
    }

    fn playback_quality(&self) -> Option<PlaybackQuality> {
        Some(PlaybackQuality {
            total_frames: self.inner.total_frames.load(Ordering::Relaxed),
            dropped_frames: self.inner.dropped_frames(),
        })
    }

    fn release(&self) {
        self.stop_drain();
        self.inner.track_dropped(None);
        self.track.lock().take();
        self.events.lock().take();
    }
}

impl Drop for FrameCounterSink {
    fn drop(&mut self) {
        self.stop_drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_handler() -> (VideoEventHandler, mpsc::UnboundedReceiver<VideoEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: VideoEventHandler = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (handler, rx)
    }

    fn packet(sequence: u16, marker: bool) -> VideoPacket {
        VideoPacket {
            payload: Bytes::from_static(&[0x65, 0x88]),
            timestamp: 90_000,
            sequence,
            marker,
        }
    }

    #[test]
    fn test_video_event_dispatch_table() {
        assert_eq!(VideoEvent::Playing.video_state(), VideoState::Playing);
        assert_eq!(VideoEvent::Paused.video_state(), VideoState::Paused);
        assert_eq!(VideoEvent::Waiting.video_state(), VideoState::Waiting);
        assert_eq!(VideoEvent::Stalled.video_state(), VideoState::Stalled);
        assert_eq!(VideoEvent::Ended.video_state(), VideoState::Ended);
        assert_eq!(
            VideoEvent::Error("decoder".to_string()).video_state(),
            VideoState::Error
        );
        assert_eq!(VideoEvent::Stalled.name(), "stalled");
    }

    #[test]
    fn test_full_queue_counts_dropped_frames() {
        let (mut feed, track) = RemoteVideoTrack::channel("video0", "camera-7", "video/H264");
        let counter = track.drop_counter();

        let mut sequence = 0u16;
        for _ in 0..TRACK_QUEUE_CAPACITY {
            assert!(feed.forward(packet(sequence, true)));
            sequence += 1;
        }
        assert_eq!(feed.dropped_frames(), 0);

        // Two packets of one frame overflow, the frame counts once
        assert!(feed.forward(packet(sequence, false)));
        assert!(feed.forward(packet(sequence + 1, true)));
        assert_eq!(feed.dropped_frames(), 1);

        assert!(feed.forward(packet(sequence + 2, true)));
        assert_eq!(counter.load(Ordering::Relaxed), 2);

        drop(track);
        assert!(!feed.forward(packet(sequence + 3, true)));
    }

    #[tokio::test]
    async fn test_play_without_track_fails() {
        let sink = FrameCounterSink::new();
        let err = sink.play().await.unwrap_err();
        assert_eq!(err.error_code(), "VIDEO_PLAYBACK_ERROR");
    }

    #[tokio::test]
    async fn test_counts_frames_by_marker() {
        let sink = FrameCounterSink::new();
        let (handler, mut events) = recording_handler();
        let (mut feed, track) = RemoteVideoTrack::channel("video0", "camera-7", "video/H264");

        sink.attach(track, handler);
        assert_eq!(events.recv().await, Some(VideoEvent::Waiting));

        sink.play().await.unwrap();
        assert!(feed.forward(packet(1, false)));
        assert!(feed.forward(packet(2, true)));
        assert!(feed.forward(packet(3, true)));

        assert_eq!(events.recv().await, Some(VideoEvent::Playing));
        drop(feed);
        assert_eq!(events.recv().await, Some(VideoEvent::Ended));

        assert_eq!(
            sink.playback_quality(),
            Some(PlaybackQuality {
                total_frames: 2,
                dropped_frames: 0
            })
        );
    }

    #[test]
    fn test_sink_reports_queue_drops() {
        let sink = FrameCounterSink::new();
        let (handler, _events) = recording_handler();
        let (mut feed, track) = RemoteVideoTrack::channel("video0", "camera-7", "video/H264");
        sink.attach(track, handler);

        // Not playing yet, nothing drains the queue
        for sequence in 0..=TRACK_QUEUE_CAPACITY as u16 {
            assert!(feed.forward(packet(sequence, true)));
        }
        assert_eq!(sink.playback_quality().unwrap().dropped_frames, 1);

        // Drops survive a track replacement
        let (handler, _events) = recording_handler();
        let (_feed, track) = RemoteVideoTrack::channel("video1", "camera-7", "video/H264");
        sink.attach(track, handler);
        assert_eq!(sink.playback_quality().unwrap().dropped_frames, 1);
    }

    #[tokio::test]
    async fn test_release_stops_playback() {
        let sink = FrameCounterSink::new();
        let (handler, mut events) = recording_handler();
        let (mut feed, track) = RemoteVideoTrack::channel("video0", "camera-7", "video/VP8");
        sink.attach(track, handler);
        sink.play().await.unwrap();
        sink.release();

        let mut released = false;
        for sequence in 0..10 {
            if !feed.forward(packet(sequence, false)) {
                released = true;
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(released);
        assert_eq!(events.recv().await, Some(VideoEvent::Waiting));
        assert!(events.try_recv().is_err());
    }
}
