//! WebSocket transport for the signaling channel

use crate::channel::{CloseInfo, LinkEvent, LinkFrame, SignalingConnector, SignalingLink};
use async_trait::async_trait;
use camwatch_core::CamwatchError;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, error};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::Message;

/// Connector dialing the gateway with `tokio-tungstenite`
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<SignalingLink, CamwatchError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| CamwatchError::Transport {
                reason: format!("WebSocket connection to {} failed: {}", url, e),
            })?;

        debug!("WebSocket connection established: {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<LinkFrame>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<LinkEvent>();

        // Writer: drains outgoing frames until close or owner drop
        tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                match frame {
                    LinkFrame::Text(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            error!("Failed to send signaling frame: {}", e);
                            break;
                        }
                    }
                    LinkFrame::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        break;
                    }
                }
            }
            let _ = write.close().await;
        });

        // Reader: forwards text frames until the socket closes
        tokio::spawn(async move {
            loop {
                let event = match read.next().await {
                    Some(Ok(Message::Text(text))) => LinkEvent::Text(text),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => LinkEvent::Text(text),
                        Err(_) => {
                            debug!("Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((1005, String::new()));
                        let _ = incoming_tx.send(LinkEvent::Closed(CloseInfo {
                            code,
                            reason,
                            clean: true,
                        }));
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = incoming_tx.send(LinkEvent::Closed(CloseInfo::abnormal(
                            e.to_string(),
                        )));
                        break;
                    }
                    None => {
                        let _ = incoming_tx
                            .send(LinkEvent::Closed(CloseInfo::abnormal("stream ended")));
                        break;
                    }
                };

                if incoming_tx.send(event).is_err() {
                    // Owner closed the channel
                    break;
                }
            }
        });

        Ok(SignalingLink {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}
