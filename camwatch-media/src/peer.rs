//! WebRTC peer seam and its `webrtc`-backed implementation

use crate::sink::{RemoteVideoTrack, TrackFeed, VideoPacket};
use async_trait::async_trait;
use camwatch_core::{CamwatchError, IceState, PeerState};
use camwatch_signaling::IceCandidate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

/// Public STUN servers used when none are configured
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Minimum number of STUN servers a peer must be configured with
pub const MIN_STUN_SERVERS: usize = 2;

/// TURN relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN URLs
    pub urls: Vec<String>,
    /// Username
    pub username: String,
    /// Credential
    pub credential: String,
}

/// ICE configuration of the receiving peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// Optional TURN relays
    pub turn_servers: Vec<TurnServer>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: Vec::new(),
        }
    }
}

impl PeerConfig {
    /// Check the ICE server list
    pub fn validate(&self) -> Result<(), CamwatchError> {
        let stun_count = self
            .stun_servers
            .iter()
            .filter(|url| url.starts_with("stun:") || url.starts_with("stuns:"))
            .count();

        if stun_count < MIN_STUN_SERVERS {
            return Err(CamwatchError::InvalidConfiguration {
                field: "stun_servers".to_string(),
                reason: format!(
                    "at least {} STUN URLs required, got {}",
                    MIN_STUN_SERVERS, stun_count
                ),
            });
        }

        if let Some(turn) = self.turn_servers.iter().find(|t| t.urls.is_empty()) {
            return Err(CamwatchError::InvalidConfiguration {
                field: "turn_servers".to_string(),
                reason: format!("TURN entry for user {} has no URLs", turn.username),
            });
        }

        Ok(())
    }

    fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut servers: Vec<RTCIceServer> = self
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        for turn in &self.turn_servers {
            servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        servers
    }
}

/// Inbound video counters of a peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboundVideoStats {
    /// Complete frames received
    pub frames_received: u64,
    /// Payload bytes received
    pub bytes_received: u64,
    /// RTP packets received
    pub packets_received: u64,
    /// RTP packets missing from the sequence
    pub packets_lost: u64,
}

/// Event raised by a peer connection
#[derive(Debug)]
pub enum PeerEvent {
    /// Local ICE candidate gathered
    LocalCandidate(IceCandidate),
    /// Peer connection state change
    ConnectionState(PeerState),
    /// ICE connection state change
    IceState(IceState),
    /// Remote video track arrived
    Track(RemoteVideoTrack),
}

/// Callback receiving peer events
pub type PeerEventHandler = Arc<dyn Fn(PeerEvent) + Send + Sync>;

/// A receive-only peer connection
#[async_trait]
pub trait MediaPeer: Send + Sync {
    /// Create an SDP offer and install it as the local description
    async fn create_offer(&self) -> Result<String, CamwatchError>;

    /// Install the remote SDP answer
    async fn apply_answer(&self, sdp: &str) -> Result<(), CamwatchError>;

    /// Add a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CamwatchError>;

    /// Cumulative inbound video counters, `None` before media flows
    async fn inbound_video_stats(&self) -> Option<InboundVideoStats>;

    /// Close the connection; idempotent
    async fn close(&self);
}

/// Creates peers for a session
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Build a peer with one recv-only video transceiver
    async fn create_peer(
        &self,
        config: &PeerConfig,
        events: PeerEventHandler,
    ) -> Result<Arc<dyn MediaPeer>, CamwatchError>;
}

/// Counters fed by the RTP reader task
#[derive(Debug, Default)]
struct RtpCounters {
    frames: u64,
    bytes: u64,
    packets: u64,
    lost: u64,
    last_sequence: Option<u16>,
}

impl RtpCounters {
    fn record(&mut self, sequence: u16, payload_len: usize, marker: bool) {
        if let Some(last) = self.last_sequence {
            let gap = sequence.wrapping_sub(last);
            // Reordered or duplicated packets land in the upper half
            if gap > 1 && gap < u16::MAX / 2 {
                self.lost += u64::from(gap - 1);
            }
        }
        if self
            .last_sequence
            .map_or(true, |last| sequence.wrapping_sub(last) < u16::MAX / 2)
        {
            self.last_sequence = Some(sequence);
        }
        self.packets += 1;
        self.bytes += payload_len as u64;
        if marker {
            self.frames += 1;
        }
    }
}

/// Peer factory backed by the `webrtc` crate
#[derive(Debug, Clone, Default)]
pub struct WebRtcPeerFactory;

impl WebRtcPeerFactory {
    /// Create a new factory
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create_peer(
        &self,
        config: &PeerConfig,
        events: PeerEventHandler,
    ) -> Result<Arc<dyn MediaPeer>, CamwatchError> {
        config.validate()?;
        let peer = WebRtcPeer::new(config, events).await?;
        Ok(Arc::new(peer))
    }
}

/// Receive-only peer connection
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    counters: Arc<Mutex<RtpCounters>>,
    readers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl fmt::Debug for WebRtcPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcPeer")
            .field("connection_state", &self.pc.connection_state())
            .field("counters", &*self.counters.lock())
            .finish()
    }
}

fn peer_error(context: &str, e: impl fmt::Display) -> CamwatchError {
    CamwatchError::Peer {
        reason: format!("{}: {}", context, e),
    }
}

fn peer_state(state: RTCPeerConnectionState) -> Option<PeerState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerState::New),
        RTCPeerConnectionState::Connecting => Some(PeerState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerState::Closed),
        _ => None,
    }
}

fn ice_state(state: RTCIceConnectionState) -> Option<IceState> {
    match state {
        RTCIceConnectionState::New => Some(IceState::New),
        RTCIceConnectionState::Checking => Some(IceState::Checking),
        RTCIceConnectionState::Connected => Some(IceState::Connected),
        RTCIceConnectionState::Completed => Some(IceState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceState::Failed),
        RTCIceConnectionState::Closed => Some(IceState::Closed),
        _ => None,
    }
}

impl WebRtcPeer {
    /// Build the peer connection and register its handlers
    pub async fn new(config: &PeerConfig, events: PeerEventHandler) -> Result<Self, CamwatchError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| peer_error("Failed to register codecs", e))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| peer_error("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers(),
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| peer_error("Failed to create peer connection", e))?;
        let pc = Arc::new(pc);

        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .map_err(|e| peer_error("Failed to add video transceiver", e))?;

        let peer = Self {
            pc,
            counters: Arc::new(Mutex::new(RtpCounters::default())),
            readers: Arc::new(Mutex::new(Vec::new())),
        };
        peer.setup_event_handlers(events);

        debug!(
            "Peer connection created with {} STUN servers",
            config.stun_servers.len()
        );
        Ok(peer)
    }

    fn setup_event_handlers(&self, events: PeerEventHandler) {
        let handler = events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                if let Some(state) = peer_state(s) {
                    info!("Peer connection state: {}", state);
                    handler(PeerEvent::ConnectionState(state));
                }
                Box::pin(async {})
            }));

        let handler = events.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
                if let Some(state) = ice_state(s) {
                    debug!("ICE connection state: {}", state);
                    handler(PeerEvent::IceState(state));
                }
                Box::pin(async {})
            }));

        let handler = events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                // End of gathering is signalled with `None`
                if let Some(json) = candidate.and_then(|c| c.to_json().ok()) {
                    debug!("Local ICE candidate: {}", json.candidate);
                    handler(PeerEvent::LocalCandidate(IceCandidate {
                        candidate: json.candidate,
                        sdp_mid: json.sdp_mid,
                        sdp_mline_index: json.sdp_mline_index,
                        username_fragment: json.username_fragment,
                    }));
                }
                Box::pin(async {})
            }));

        let handler = events;
        let counters = self.counters.clone();
        let readers = self.readers.clone();
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let mime_type = track.codec().capability.mime_type.clone();
            if track.kind() == RTPCodecType::Video {
                info!("Remote video track {} ({})", track.id(), mime_type);
                let (feed, remote) =
                    RemoteVideoTrack::channel(track.id(), track.stream_id(), mime_type);
                handler(PeerEvent::Track(remote));
                readers
                    .lock()
                    .push(tokio::spawn(read_track(track, counters.clone(), feed)));
            } else {
                debug!("Ignoring non-video track {} ({})", track.id(), mime_type);
            }
            Box::pin(async {})
        }));
    }
}

/// Forward RTP packets of `track` to the sink queue until either side ends
async fn read_track(
    track: Arc<TrackRemote>,
    counters: Arc<Mutex<RtpCounters>>,
    mut feed: TrackFeed,
) {
    loop {
        let (packet, _attributes) = match track.read_rtp().await {
            Ok(read) => read,
            Err(e) => {
                debug!("Track {} read ended: {}", track.id(), e);
                break;
            }
        };

        counters.lock().record(
            packet.header.sequence_number,
            packet.payload.len(),
            packet.header.marker,
        );
        trace!(
            "RTP seq={} ts={} size={}",
            packet.header.sequence_number,
            packet.header.timestamp,
            packet.payload.len()
        );

        let forwarded = feed.forward(VideoPacket {
            payload: packet.payload,
            timestamp: packet.header.timestamp,
            sequence: packet.header.sequence_number,
            marker: packet.header.marker,
        });
        if !forwarded {
            debug!("Sink released track {}, stopping reader", track.id());
            break;
        }
    }
}

#[async_trait]
impl MediaPeer for WebRtcPeer {
    async fn create_offer(&self) -> Result<String, CamwatchError> {
        let offer = self
            .pc
            .create_offer(Some(RTCOfferOptions {
                voice_activity_detection: false,
                ice_restart: false,
            }))
            .await
            .map_err(|e| peer_error("Failed to create offer", e))?;

        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| peer_error("Failed to set local description", e))?;

        Ok(sdp)
    }

    async fn apply_answer(&self, sdp: &str) -> Result<(), CamwatchError> {
        let answer = RTCSessionDescription::answer(sdp.to_string()).map_err(|e| {
            CamwatchError::InvalidAnswer {
                reason: e.to_string(),
            }
        })?;

        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| CamwatchError::InvalidAnswer {
                reason: e.to_string(),
            })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CamwatchError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| peer_error("Failed to add ICE candidate", e))
    }

    async fn inbound_video_stats(&self) -> Option<InboundVideoStats> {
        let report = self.pc.get_stats().await;
        let (mut bytes, mut packets) = (None, None);
        for stat in report.reports.values() {
            if let StatsReportType::InboundRTP(rtp) = stat {
                if rtp.kind == "video" {
                    bytes = Some(rtp.bytes_received);
                    packets = Some(rtp.packets_received);
                }
            }
        }

        let counters = self.counters.lock();
        if counters.packets == 0 && bytes.is_none() {
            return None;
        }

        Some(InboundVideoStats {
            frames_received: counters.frames,
            bytes_received: bytes.unwrap_or(counters.bytes),
            packets_received: packets.unwrap_or(counters.packets),
            packets_lost: counters.lost,
        })
    }

    async fn close(&self) {
        for reader in self.readers.lock().drain(..) {
            reader.abort();
        }
        if let Err(e) = self.pc.close().await {
            warn!("Error closing peer connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config_is_valid() {
        let config = PeerConfig::default();
        assert_eq!(config.stun_servers.len(), 2);
        assert_ok!(config.validate());
        assert_eq!(config.ice_servers().len(), 2);
    }

    #[test]
    fn test_config_requires_two_stun_servers() {
        let config = PeerConfig {
            stun_servers: vec!["stun:stun.example.org:3478".to_string()],
            turn_servers: vec![],
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");

        let config = PeerConfig {
            stun_servers: vec![
                "stun:a.example.org".to_string(),
                "turn:b.example.org".to_string(),
            ],
            turn_servers: vec![],
        };
        assert_err!(config.validate());
    }

    #[test]
    fn test_turn_servers_are_appended() {
        let config = PeerConfig {
            turn_servers: vec![TurnServer {
                urls: vec!["turn:relay.example.org:3478".to_string()],
                username: "cam".to_string(),
                credential: "secret".to_string(),
            }],
            ..Default::default()
        };
        assert_ok!(config.validate());
        let servers = config.ice_servers();
        assert_eq!(servers.len(), 3);
        assert_eq!(servers[2].username, "cam");
    }

    #[test]
    fn test_rtp_counters_frames_and_loss() {
        let mut counters = RtpCounters::default();
        counters.record(10, 1000, false);
        counters.record(11, 800, true);
        counters.record(14, 1200, true);
        assert_eq!(counters.frames, 2);
        assert_eq!(counters.bytes, 3000);
        assert_eq!(counters.packets, 3);
        assert_eq!(counters.lost, 2);

        // A late packet is not counted as loss and does not rewind the sequence
        counters.record(12, 100, false);
        assert_eq!(counters.lost, 2);
        assert_eq!(counters.last_sequence, Some(14));
    }

    #[test]
    fn test_rtp_counters_sequence_wrap() {
        let mut counters = RtpCounters::default();
        counters.record(u16::MAX - 1, 10, false);
        counters.record(u16::MAX, 10, false);
        counters.record(1, 10, true);
        assert_eq!(counters.lost, 1);
        assert_eq!(counters.last_sequence, Some(1));
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            peer_state(RTCPeerConnectionState::Failed),
            Some(PeerState::Failed)
        );
        assert_eq!(
            ice_state(RTCIceConnectionState::Checking),
            Some(IceState::Checking)
        );
        assert_eq!(peer_state(RTCPeerConnectionState::Unspecified), None);
    }
}
