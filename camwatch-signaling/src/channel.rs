//! Client-side signaling channel
//!
//! A [`SignalingChannel`] is scoped to one `(camera_id, client_id)` pair. It
//! dials the gateway through a [`SignalingConnector`], parses inbound frames
//! into [`SignalingMessage`]s and hands every event to the owner's handler in
//! arrival order.

use crate::protocol::SignalingMessage;
use async_trait::async_trait;
use camwatch_core::{CamwatchError, SignalingState};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Close code used when the link vanished without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code sent on caller-initiated close
pub const NORMAL_CLOSURE: u16 = 1000;

/// Default time allowed for the socket to become ready
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Frame written to the socket
#[derive(Debug, Clone, PartialEq)]
pub enum LinkFrame {
    /// JSON text frame
    Text(String),
    /// Close handshake
    Close {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// Close details reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code
    pub code: u16,
    /// Close reason
    pub reason: String,
    /// Whether a close handshake completed
    pub clean: bool,
}

impl CloseInfo {
    /// Closure without a handshake
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
            clean: false,
        }
    }
}

/// Event read from the socket
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Text frame
    Text(String),
    /// Socket closed by the remote end or the network
    Closed(CloseInfo),
}

/// An open, bidirectional text link to the gateway
#[derive(Debug)]
pub struct SignalingLink {
    /// Frames to write
    pub outgoing: mpsc::UnboundedSender<LinkFrame>,
    /// Frames read
    pub incoming: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Dials the signaling endpoint
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Open a link to `url`, resolving once the transport is ready
    async fn connect(&self, url: &str) -> Result<SignalingLink, CamwatchError>;
}

/// Events surfaced to the channel owner
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Channel state transition
    StateChanged(SignalingState),
    /// Parsed inbound message
    Message(SignalingMessage),
    /// Inbound frame that could not be parsed
    Malformed {
        /// Raw frame
        raw: String,
        /// Parse failure
        reason: String,
    },
    /// Socket closed without the owner asking for it
    Closed(CloseInfo),
}

/// Owner callback for channel events
pub type ChannelEventHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Build the per-camera, per-client signaling address
pub fn signaling_url(base_url: &str, camera_id: &str, client_id: &str) -> String {
    format!(
        "{}/ws/{}/{}",
        base_url.trim_end_matches('/'),
        camera_id,
        client_id
    )
}

/// Signaling channel for one camera session
pub struct SignalingChannel {
    url: String,
    connector: Arc<dyn SignalingConnector>,
    open_timeout: Duration,
    handler: ChannelEventHandler,
    state: Arc<Mutex<SignalingState>>,
    outgoing: Option<mpsc::UnboundedSender<LinkFrame>>,
    reader: Option<JoinHandle<()>>,
}

impl fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("url", &self.url)
            .field("open_timeout", &self.open_timeout)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl SignalingChannel {
    /// Create a closed channel
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn SignalingConnector>,
        open_timeout: Duration,
        handler: ChannelEventHandler,
    ) -> Self {
        Self {
            url: url.into(),
            connector,
            open_timeout,
            handler,
            state: Arc::new(Mutex::new(SignalingState::Disconnected)),
            outgoing: None,
            reader: None,
        }
    }

    /// Signaling endpoint address
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current channel state
    pub fn state(&self) -> SignalingState {
        *self.state.lock()
    }

    /// Whether `send` would be accepted
    pub fn is_ready(&self) -> bool {
        self.state() == SignalingState::Connected && self.outgoing.is_some()
    }

    /// Open the socket and wait for it to become ready
    pub async fn open(&mut self) -> Result<(), CamwatchError> {
        self.begin_open();
        let result = Self::dial(
            self.connector.clone(),
            self.url.clone(),
            self.open_timeout,
        )
        .await;
        self.complete_open(result)
    }

    /// Mark the channel as connecting ahead of a [`SignalingChannel::dial`]
    pub fn begin_open(&mut self) {
        self.detach();
        self.transition(SignalingState::Connecting);
    }

    /// Dial `url` with a bounded wait
    ///
    /// Kept separate from [`SignalingChannel::open`] so an owner can run the
    /// wait on its own task and attach the link later.
    pub async fn dial(
        connector: Arc<dyn SignalingConnector>,
        url: String,
        open_timeout: Duration,
    ) -> Result<SignalingLink, CamwatchError> {
        debug!("Dialing signaling endpoint {}", url);
        match tokio::time::timeout(open_timeout, connector.connect(&url)).await {
            Ok(result) => result,
            Err(_) => Err(CamwatchError::SignalingTimeout {
                url,
                timeout: open_timeout,
            }),
        }
    }

    /// Attach a dialed link, or record the dial failure
    pub fn complete_open(
        &mut self,
        result: Result<SignalingLink, CamwatchError>,
    ) -> Result<(), CamwatchError> {
        match result {
            Ok(link) => {
                self.attach(link);
                info!("Signaling channel open: {}", self.url);
                Ok(())
            }
            Err(e) => {
                warn!("Signaling channel failed to open: {}", e);
                self.transition(SignalingState::Error);
                Err(e)
            }
        }
    }

    fn attach(&mut self, link: SignalingLink) {
        let SignalingLink {
            outgoing,
            mut incoming,
        } = link;

        self.outgoing = Some(outgoing);
        self.transition(SignalingState::Connected);

        let handler = self.handler.clone();
        let state = self.state.clone();
        let url = self.url.clone();

        self.reader = Some(tokio::spawn(async move {
            let close = loop {
                match incoming.recv().await {
                    Some(LinkEvent::Text(text)) => match SignalingMessage::parse(&text) {
                        Ok(message) => {
                            debug!("Signaling message received: {}", message.message_type());
                            handler(ChannelEvent::Message(message));
                        }
                        Err(e) => {
                            warn!("Invalid signaling frame: {}", e);
                            handler(ChannelEvent::Malformed {
                                raw: text,
                                reason: e.to_string(),
                            });
                        }
                    },
                    Some(LinkEvent::Closed(info)) => break info,
                    None => break CloseInfo::abnormal("link dropped"),
                }
            };

            warn!(
                "Signaling channel {} closed by remote (code {}, clean {}): {}",
                url, close.code, close.clean, close.reason
            );
            *state.lock() = SignalingState::Error;
            handler(ChannelEvent::StateChanged(SignalingState::Error));
            handler(ChannelEvent::Closed(close));
        }));
    }

    /// Send a message if the socket is ready
    pub fn send(&self, message: &SignalingMessage) -> Result<(), CamwatchError> {
        let state = self.state();
        let outgoing = match (&self.outgoing, state) {
            (Some(outgoing), SignalingState::Connected) => outgoing,
            _ => {
                return Err(CamwatchError::SignalingNotReady {
                    state: state.to_string(),
                })
            }
        };

        let json = message.to_json()?;
        outgoing
            .send(LinkFrame::Text(json))
            .map_err(|_| CamwatchError::SignalingNotReady {
                state: "closing".to_string(),
            })?;

        debug!("Signaling message sent: {}", message.message_type());
        Ok(())
    }

    /// Caller-initiated close; no `Closed` event is reported
    pub fn close(&mut self) {
        let had_link = self.outgoing.is_some();
        if let Some(outgoing) = self.outgoing.take() {
            let _ = outgoing.send(LinkFrame::Close {
                code: NORMAL_CLOSURE,
                reason: "client closing".to_string(),
            });
        }
        self.detach();

        if had_link {
            info!("Signaling channel closed: {}", self.url);
        }
        self.transition(SignalingState::Disconnected);
    }

    fn detach(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.outgoing = None;
    }

    fn transition(&self, next: SignalingState) {
        let changed = {
            let mut state = self.state.lock();
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            (self.handler)(ChannelEvent::StateChanged(next));
        }
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.detach();
    }
}
