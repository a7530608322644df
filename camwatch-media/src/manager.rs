//! Peer connection negotiation for one camera session
//!
//! [`PeerConnectionManager`] owns the session's [`MediaPeer`], drives the
//! offer/answer exchange through the [`SignalingChannel`] and forwards
//! trickle ICE candidates in both directions.

use crate::peer::{InboundVideoStats, MediaPeer, PeerConfig, PeerEventHandler, PeerFactory};
use crate::sink::{RemoteVideoTrack, VideoEventHandler, VideoSink};
use camwatch_core::{CamwatchError, IceState, PeerState};
use camwatch_signaling::{IceCandidate, IceCandidateMessage, SdpOffer, SignalingChannel, SignalingMessage};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Negotiates and tracks the receive-only peer connection
pub struct PeerConnectionManager {
    factory: Arc<dyn PeerFactory>,
    config: PeerConfig,
    camera_id: String,
    client_id: String,
    peer: Option<Arc<dyn MediaPeer>>,
    state: PeerState,
    ice_state: IceState,
}

impl fmt::Debug for PeerConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnectionManager")
            .field("camera_id", &self.camera_id)
            .field("client_id", &self.client_id)
            .field("has_peer", &self.peer.is_some())
            .field("state", &self.state)
            .field("ice_state", &self.ice_state)
            .finish()
    }
}

impl PeerConnectionManager {
    /// Create a manager without a peer
    pub fn new(
        factory: Arc<dyn PeerFactory>,
        config: PeerConfig,
        camera_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            factory,
            config,
            camera_id: camera_id.into(),
            client_id: client_id.into(),
            peer: None,
            state: PeerState::Idle,
            ice_state: IceState::New,
        }
    }

    /// Last reported peer connection state
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Last reported ICE connection state
    pub fn ice_state(&self) -> IceState {
        self.ice_state
    }

    /// Whether a peer connection exists
    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    /// Build a fresh peer, create the offer and send it to the gateway
    ///
    /// Any previous peer is closed first.
    pub async fn create_offer(
        &mut self,
        channel: &SignalingChannel,
        detection_requested: bool,
        events: PeerEventHandler,
    ) -> Result<(), CamwatchError> {
        self.close().await;

        let peer = self.factory.create_peer(&self.config, events).await?;
        self.peer = Some(peer.clone());
        self.state = PeerState::New;

        let sdp = peer.create_offer().await?;
        channel.send(&SignalingMessage::Offer(SdpOffer {
            sdp,
            client_id: self.client_id.clone(),
            camera_id: self.camera_id.clone(),
            detection_requested,
        }))?;

        info!(
            camera_id = %self.camera_id,
            client_id = %self.client_id,
            "Offer sent (detection requested: {})",
            detection_requested
        );
        Ok(())
    }

    /// Install the gateway's answer
    pub async fn apply_answer(&self, sdp: Option<&str>) -> Result<(), CamwatchError> {
        let sdp = match sdp {
            Some(sdp) if !sdp.trim().is_empty() => sdp,
            _ => {
                return Err(CamwatchError::InvalidAnswer {
                    reason: "answer carries no SDP".to_string(),
                })
            }
        };

        let peer = self.peer.as_ref().ok_or_else(|| CamwatchError::InvalidAnswer {
            reason: "no offer outstanding".to_string(),
        })?;

        peer.apply_answer(sdp).await?;
        debug!("Remote description applied");
        Ok(())
    }

    /// Add a candidate trickled by the gateway; empty candidates are ignored
    pub async fn add_remote_ice_candidate(
        &self,
        candidate: Option<IceCandidate>,
    ) -> Result<(), CamwatchError> {
        let candidate = match candidate {
            Some(candidate) if !candidate.is_empty() => candidate,
            _ => {
                debug!("Ignoring empty remote ICE candidate");
                return Ok(());
            }
        };

        match &self.peer {
            Some(peer) => peer.add_ice_candidate(candidate).await,
            None => {
                warn!("Remote ICE candidate received without a peer");
                Ok(())
            }
        }
    }

    /// Signaling message announcing a local candidate to the gateway
    pub fn local_candidate_message(&self, candidate: IceCandidate) -> SignalingMessage {
        SignalingMessage::IceCandidate(IceCandidateMessage {
            candidate: Some(candidate),
            destination_id: Some(self.client_id.clone()),
        })
    }

    /// Trickle a gathered local candidate to the gateway
    pub fn forward_local_candidate(
        &self,
        channel: &SignalingChannel,
        candidate: IceCandidate,
    ) -> Result<(), CamwatchError> {
        channel.send(&self.local_candidate_message(candidate))
    }

    /// Bind the remote track to the sink and start playback
    pub async fn bind_remote_track(
        &self,
        sink: &dyn VideoSink,
        track: RemoteVideoTrack,
        events: VideoEventHandler,
    ) -> Result<(), CamwatchError> {
        info!("Binding remote track {} to video sink", track.id);
        sink.attach(track, events);
        sink.play().await
    }

    /// Record a peer connection state report
    ///
    /// Returns `true` when the report requires reconnection.
    pub fn record_state(&mut self, state: PeerState) -> bool {
        self.state = state;
        state == PeerState::Failed
    }

    /// Record an ICE connection state report
    ///
    /// Returns `true` when the report requires reconnection.
    pub fn record_ice_state(&mut self, state: IceState) -> bool {
        self.ice_state = state;
        state == IceState::Failed
    }

    /// Cumulative inbound video counters of the current peer
    pub async fn inbound_video_stats(&self) -> Option<InboundVideoStats> {
        match &self.peer {
            Some(peer) => peer.inbound_video_stats().await,
            None => None,
        }
    }

    /// Close and drop the current peer
    pub async fn close(&mut self) {
        if let Some(peer) = self.peer.take() {
            peer.close().await;
            debug!("Peer connection closed");
        }
        self.state = PeerState::Idle;
        self.ice_state = IceState::New;
    }
}
