//! Integration tests for peer negotiation and track binding
//!
//! These tests exercise the media crate through its public surface:
//! - Real `webrtc` peer producing a receive-only video offer
//! - Track binding into the frame counting sink
//! - Peer configuration validation at the factory

use camwatch_core::VideoState;
use bytes::Bytes;
use camwatch_media::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn next(events: &mut mpsc::UnboundedReceiver<VideoState>) -> VideoState {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("video event within timeout")
        .expect("video events open")
}

fn ignore_peer_events() -> PeerEventHandler {
    Arc::new(|_: PeerEvent| {})
}

#[tokio::test]
async fn test_webrtc_peer_offers_recvonly_video() -> anyhow::Result<()> {
    let factory = WebRtcPeerFactory::new();
    let peer = factory
        .create_peer(&PeerConfig::default(), ignore_peer_events())
        .await?;

    let sdp = peer.create_offer().await?;
    assert!(sdp.contains("m=video"), "offer without video: {}", sdp);
    assert!(sdp.contains("a=recvonly"), "offer not recv-only: {}", sdp);
    assert!(!sdp.contains("m=audio"), "offer carries audio: {}", sdp);

    assert!(peer.inbound_video_stats().await.is_none());
    peer.close().await;
    peer.close().await;
    Ok(())
}

#[tokio::test]
async fn test_factory_rejects_single_stun_server() {
    let factory = WebRtcPeerFactory::new();
    let config = PeerConfig {
        stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        turn_servers: vec![],
    };

    match factory.create_peer(&config, ignore_peer_events()).await {
        Err(err) => assert_eq!(err.error_code(), "INVALID_CONFIGURATION"),
        Ok(_) => panic!("peer created with a single STUN server"),
    }
}

#[tokio::test]
async fn test_remote_track_plays_into_sink() {
    let sink = FrameCounterSink::new();
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let video_events: VideoEventHandler = Arc::new(move |event: VideoEvent| {
        let _ = event_tx.send(event.video_state());
    });

    let manager = PeerConnectionManager::new(
        Arc::new(WebRtcPeerFactory::new()),
        PeerConfig::default(),
        "7",
        "client-1",
    );

    let (mut feed, track) = RemoteVideoTrack::channel("video0", "camera-7", "video/H264");
    manager
        .bind_remote_track(&sink, track, video_events)
        .await
        .unwrap();

    for sequence in 0..48u16 {
        assert!(feed.forward(VideoPacket {
            payload: Bytes::from_static(b"frame"),
            timestamp: u32::from(sequence) * 3750,
            sequence,
            marker: true,
        }));
    }

    assert_eq!(next(&mut events).await, VideoState::Waiting);
    assert_eq!(next(&mut events).await, VideoState::Playing);

    drop(feed);
    assert_eq!(next(&mut events).await, VideoState::Ended);
    assert_eq!(sink.playback_quality().unwrap().total_frames, 48);

    sink.release();
}
