//! Stream session orchestration
//!
//! A [`StreamSession`] is a handle to a single actor task that owns the
//! signaling channel, the peer connection, the video sink binding, the
//! detection controller, telemetry and the reconnection policy. Caller
//! commands, signaling messages, peer and sink events and timer ticks all
//! go through one queue and are handled in arrival order.
//!
//! Spawned work (dials, timers) posts its result back tagged with the
//! connection `epoch` or the session `generation`. Teardown bumps the
//! counter, so late results from an older connection are dropped.

use crate::config::SessionConfig;
use crate::detection::{DetectionController, DetectionTransition};
use crate::event::{DetectionCallback, DetectionEvent, StatusEvent, StatusKind, StatusObserver};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy};
use camwatch_core::{
    CamwatchError, ConnectionState, PeerState, SessionState, SignalingState, SubsystemStates,
    VideoState,
};
use camwatch_diagnostics::{SessionStatus, StreamStats, TelemetryMonitor};
use camwatch_media::{
    FrameCounterSink, PeerConnectionManager, PeerEvent, PeerEventHandler, PeerFactory,
    VideoEvent, VideoEventHandler, VideoSink, WebRtcPeerFactory,
};
use camwatch_signaling::{
    signaling_url, ChannelEvent, ChannelEventHandler, DetectionStatusKind, SignalingChannel,
    SignalingConnector, SignalingLink, SignalingMessage, WebSocketConnector,
};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

type Reply<T> = oneshot::Sender<Result<T, CamwatchError>>;

/// Everything the session actor reacts to
enum SessionInput {
    Connect {
        detection_requested: bool,
        reply: Reply<()>,
    },
    ToggleDetection {
        enable: bool,
        reply: Reply<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    // Handle dropped: stop, then end the task
    Shutdown,
    Dialed {
        epoch: u64,
        result: Result<SignalingLink, CamwatchError>,
    },
    Channel {
        epoch: u64,
        event: ChannelEvent,
    },
    Peer {
        epoch: u64,
        event: PeerEvent,
    },
    Video {
        epoch: u64,
        event: VideoEvent,
    },
    StatsTick {
        epoch: u64,
    },
    HeartbeatTick {
        generation: u64,
    },
    ToggleTimeout {
        generation: u64,
        token: u64,
    },
    ReconnectDue {
        generation: u64,
        attempt: u32,
    },
}

/// Read side of the actor state, refreshed after every input
struct SharedStatus {
    status: SessionStatus,
    connected_at: Option<Instant>,
}

/// Handle to a live camera stream session
///
/// Dropping the handle stops the session in the background: detection is
/// disabled, the peer and channel are closed, the sink is released and the
/// task ends. Call [`StreamSession::stop`] to wait for that to finish.
pub struct StreamSession {
    camera_id: String,
    client_id: String,
    inputs: mpsc::UnboundedSender<SessionInput>,
    shared: Arc<RwLock<SharedStatus>>,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("camera_id", &self.camera_id)
            .field("client_id", &self.client_id)
            .field("session_state", &self.session_state())
            .finish()
    }
}

impl StreamSession {
    /// Start building a session for `camera_id`
    pub fn builder(camera_id: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(camera_id)
    }

    /// Session with default configuration, WebSocket signaling and a
    /// `webrtc` peer
    pub fn new(
        camera_id: impl Into<String>,
        sink: Arc<dyn VideoSink>,
        on_detection: DetectionCallback,
        observer: StatusObserver,
    ) -> Result<Self, CamwatchError> {
        SessionBuilder::new(camera_id)
            .sink(sink)
            .detection_callback(on_detection)
            .observer(observer)
            .build()
    }

    /// Camera this session streams
    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Identifier sent with every signaling message
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Open signaling and send the offer
    ///
    /// Resolves once the offer is sent. The session turns `active` when the
    /// gateway's answer is applied.
    pub async fn connect(&self, detection_requested: bool) -> Result<(), CamwatchError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionInput::Connect {
            detection_requested,
            reply,
        })?;
        response.await.map_err(|_| CamwatchError::SessionClosed)?
    }

    /// Ask the gateway to start or stop detection; only valid while active
    pub async fn toggle_detection(&self, enable: bool) -> Result<(), CamwatchError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionInput::ToggleDetection { enable, reply })?;
        response.await.map_err(|_| CamwatchError::SessionClosed)?
    }

    /// Tear everything down; calling it again has no effect
    pub async fn stop(&self) {
        let (reply, response) = oneshot::channel();
        if self.send(SessionInput::Stop { reply }).is_ok() {
            let _ = response.await;
        }
    }

    /// Snapshot of the whole session, as sent with heartbeats
    pub fn status(&self) -> SessionStatus {
        let shared = self.shared.read();
        let mut status = shared.status.clone();
        status.uptime_secs = shared
            .connected_at
            .map(|at| Instant::now().saturating_duration_since(at).as_secs_f64())
            .unwrap_or(0.0);
        status
    }

    /// Lifecycle state
    pub fn session_state(&self) -> SessionState {
        self.shared.read().status.session_state
    }

    /// Peer connection summary
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.read().status.connection_state
    }

    /// Whether detection is active or requested
    pub fn detection_active(&self) -> bool {
        self.shared.read().status.detection_active
    }

    /// Reconnection attempts since the last successful connection
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.read().status.reconnect_attempts
    }

    /// Per-subsystem states
    pub fn subsystem_states(&self) -> SubsystemStates {
        self.shared.read().status.subsystems
    }

    /// Latest stream statistics
    pub fn stats(&self) -> StreamStats {
        self.shared.read().status.stats.clone()
    }

    fn send(&self, input: SessionInput) -> Result<(), CamwatchError> {
        self.inputs
            .send(input)
            .map_err(|_| CamwatchError::SessionClosed)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.inputs.send(SessionInput::Shutdown).is_err() {
            debug!(camera_id = %self.camera_id, "Session task already ended");
        }
    }
}

/// Fluent builder for a [`StreamSession`]
pub struct SessionBuilder {
    camera_id: String,
    config: SessionConfig,
    sink: Option<Arc<dyn VideoSink>>,
    observer: Option<StatusObserver>,
    on_detection: Option<DetectionCallback>,
    connector: Option<Arc<dyn SignalingConnector>>,
    peer_factory: Option<Arc<dyn PeerFactory>>,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("camera_id", &self.camera_id)
            .field("config", &self.config)
            .field("custom_sink", &self.sink.is_some())
            .field("custom_connector", &self.connector.is_some())
            .field("custom_peer_factory", &self.peer_factory.is_some())
            .finish()
    }
}

impl SessionBuilder {
    /// Builder with default configuration
    pub fn new(camera_id: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            config: SessionConfig::default(),
            sink: None,
            observer: None,
            on_detection: None,
            connector: None,
            peer_factory: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the gateway base URL
    pub fn signaling_url(mut self, url: impl Into<String>) -> Self {
        self.config.signaling_url = url.into();
        self
    }

    /// Set the reconnection budget
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Sink the remote video track is bound to
    pub fn sink(mut self, sink: Arc<dyn VideoSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Observer receiving every status event
    pub fn observer(mut self, observer: StatusObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Closure receiving every status event
    pub fn on_status<F>(self, callback: F) -> Self
    where
        F: Fn(StatusEvent) + Send + Sync + 'static,
    {
        self.observer(Arc::new(callback))
    }

    /// Callback receiving detection events
    pub fn detection_callback(mut self, callback: DetectionCallback) -> Self {
        self.on_detection = Some(callback);
        self
    }

    /// Closure receiving detection events
    pub fn on_detection<F>(self, callback: F) -> Self
    where
        F: Fn(DetectionEvent) + Send + Sync + 'static,
    {
        self.detection_callback(Arc::new(callback))
    }

    /// Replace the signaling transport
    pub fn connector(mut self, connector: Arc<dyn SignalingConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the peer connection backend
    pub fn peer_factory(mut self, factory: Arc<dyn PeerFactory>) -> Self {
        self.peer_factory = Some(factory);
        self
    }

    /// Validate the configuration and spawn the session task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<StreamSession, CamwatchError> {
        if self.camera_id.trim().is_empty() {
            return Err(CamwatchError::InvalidConfiguration {
                field: "camera_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        self.config.validate()?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            CamwatchError::InvalidState {
                expected: "running inside a Tokio runtime".to_string(),
                actual: "no runtime".to_string(),
            }
        })?;

        let client_id = uuid::Uuid::new_v4().to_string();
        let camera_id = self.camera_id;
        let config = self.config;

        let sink: Arc<dyn VideoSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(FrameCounterSink::new()),
        };
        let observer: StatusObserver = match self.observer {
            Some(observer) => observer,
            None => Arc::new(|_: StatusEvent| {}),
        };
        let on_detection: DetectionCallback = match self.on_detection {
            Some(callback) => callback,
            None => Arc::new(|_: DetectionEvent| {}),
        };
        let connector: Arc<dyn SignalingConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WebSocketConnector::new()),
        };
        let peer_factory: Arc<dyn PeerFactory> = match self.peer_factory {
            Some(factory) => factory,
            None => Arc::new(WebRtcPeerFactory::new()),
        };

        let (inputs, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(RwLock::new(SharedStatus {
            status: SessionStatus {
                camera_id: camera_id.clone(),
                client_id: client_id.clone(),
                session_state: SessionState::Idle,
                connection_state: ConnectionState::Disconnected,
                detection_active: false,
                subsystems: SubsystemStates::baseline(),
                reconnect_attempts: 0,
                uptime_secs: 0.0,
                stats: StreamStats::default(),
            },
            connected_at: None,
        }));

        let actor = SessionActor {
            peers: PeerConnectionManager::new(
                peer_factory,
                config.peer.clone(),
                camera_id.clone(),
                client_id.clone(),
            ),
            detection: DetectionController::new(config.detection_toggle_timeout),
            reconnect: ReconnectPolicy::new(
                config.max_reconnect_attempts,
                config.reconnect_base_delay,
            ),
            telemetry: TelemetryMonitor::new(config.stats_interval, config.heartbeat_interval),
            camera_id: camera_id.clone(),
            client_id: client_id.clone(),
            config,
            connector,
            sink,
            observer,
            on_detection,
            inputs: inputs.clone(),
            shared: shared.clone(),
            state: SessionState::Idle,
            subsystems: SubsystemStates::baseline(),
            channel: None,
            epoch: 0,
            generation: 0,
            detection_requested: false,
            pending_connect: None,
            dial_task: None,
            toggle_timer: None,
            reconnect_timer: None,
        };

        info!(
            camera_id = %camera_id,
            client_id = %client_id,
            "Stream session created"
        );

        runtime.spawn(actor.run(receiver));
        Ok(StreamSession {
            camera_id,
            client_id,
            inputs,
            shared,
        })
    }
}

struct SessionActor {
    camera_id: String,
    client_id: String,
    config: SessionConfig,
    connector: Arc<dyn SignalingConnector>,
    sink: Arc<dyn VideoSink>,
    observer: StatusObserver,
    on_detection: DetectionCallback,
    inputs: mpsc::UnboundedSender<SessionInput>,
    shared: Arc<RwLock<SharedStatus>>,

    state: SessionState,
    subsystems: SubsystemStates,
    channel: Option<SignalingChannel>,
    peers: PeerConnectionManager,
    detection: DetectionController,
    reconnect: ReconnectPolicy,
    telemetry: TelemetryMonitor,

    epoch: u64,
    generation: u64,
    detection_requested: bool,
    pending_connect: Option<Reply<()>>,
    dial_task: Option<JoinHandle<()>>,
    toggle_timer: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl SessionActor {
    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<SessionInput>) {
        while let Some(input) = inputs.recv().await {
            let shutdown = matches!(input, SessionInput::Shutdown);
            self.handle(input).await;
            self.publish();
            if shutdown {
                debug!(camera_id = %self.camera_id, "Session handle dropped, task ending");
                break;
            }
        }
    }

    async fn handle(&mut self, input: SessionInput) {
        match input {
            SessionInput::Connect {
                detection_requested,
                reply,
            } => self.connect(detection_requested, reply),
            SessionInput::ToggleDetection { enable, reply } => {
                let result = self.toggle_detection(enable);
                let _ = reply.send(result);
            }
            SessionInput::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(());
            }
            SessionInput::Shutdown => self.stop().await,
            SessionInput::Dialed { epoch, result } if epoch == self.epoch => {
                self.on_dialed(result).await
            }
            SessionInput::Channel { epoch, event } if epoch == self.epoch => {
                self.on_channel_event(event).await
            }
            SessionInput::Peer { epoch, event } if epoch == self.epoch => {
                self.on_peer_event(event).await
            }
            SessionInput::Video { epoch, event } if epoch == self.epoch => {
                self.on_video_event(event).await
            }
            SessionInput::StatsTick { epoch } if epoch == self.epoch => self.sample_stats().await,
            SessionInput::HeartbeatTick { generation } if generation == self.generation => {
                self.heartbeat()
            }
            SessionInput::ToggleTimeout { generation, token } if generation == self.generation => {
                self.on_toggle_timeout(token)
            }
            SessionInput::ReconnectDue {
                generation,
                attempt,
            } if generation == self.generation => self.start_reconnect_attempt(attempt),
            _ => debug!("Discarding input from a torn-down connection"),
        }
    }

    // Commands

    fn connect(&mut self, detection_requested: bool, reply: Reply<()>) {
        if !self.state.can_connect() {
            let _ = reply.send(Err(CamwatchError::InvalidState {
                expected: "idle, failed or stopped".to_string(),
                actual: self.state.to_string(),
            }));
            return;
        }

        info!(
            camera_id = %self.camera_id,
            client_id = %self.client_id,
            "Connecting (detection requested: {})",
            detection_requested
        );
        self.reconnect.reset();
        self.detection_requested = detection_requested;
        self.pending_connect = Some(reply);
        self.set_state(SessionState::Connecting);
        self.start_heartbeat();
        self.start_dial();
    }

    fn toggle_detection(&mut self, enable: bool) -> Result<(), CamwatchError> {
        if self.state != SessionState::Active {
            return Err(CamwatchError::InvalidState {
                expected: SessionState::Active.to_string(),
                actual: self.state.to_string(),
            });
        }

        let (pending, transition) = match self.detection.begin_toggle(enable) {
            Some(toggle) => toggle,
            None => return Ok(()),
        };

        let request = SignalingMessage::detection_request(&self.camera_id, &self.client_id, enable);
        let sent = match &self.channel {
            Some(channel) => channel.send(&request),
            None => Err(CamwatchError::SignalingNotReady {
                state: SignalingState::Disconnected.to_string(),
            }),
        };
        if let Err(e) = sent {
            warn!("Detection request not sent: {}", e);
            self.detection.abort(pending.token);
            return Err(e);
        }

        self.apply_detection_transition(transition);
        self.arm_toggle_timer(pending.token);
        Ok(())
    }

    async fn stop(&mut self) {
        if self.state == SessionState::Stopped {
            debug!("Session already stopped");
            return;
        }
        info!(
            camera_id = %self.camera_id,
            client_id = %self.client_id,
            "Stopping session"
        );
        self.cleanup(SessionState::Stopped, SubsystemStates::baseline())
            .await;
    }

    // Connection lifecycle

    fn start_dial(&mut self) {
        self.epoch += 1;
        let epoch = self.epoch;

        let inputs = self.inputs.clone();
        let handler: ChannelEventHandler = Arc::new(move |event: ChannelEvent| {
            let _ = inputs.send(SessionInput::Channel { epoch, event });
        });
        let url = signaling_url(&self.config.signaling_url, &self.camera_id, &self.client_id);
        let mut channel = SignalingChannel::new(
            url.clone(),
            self.connector.clone(),
            self.config.open_timeout,
            handler,
        );
        channel.begin_open();
        self.channel = Some(channel);

        let connector = self.connector.clone();
        let open_timeout = self.config.open_timeout;
        let inputs = self.inputs.clone();
        self.dial_task = Some(tokio::spawn(async move {
            let result = SignalingChannel::dial(connector, url, open_timeout).await;
            let _ = inputs.send(SessionInput::Dialed { epoch, result });
        }));
    }

    async fn on_dialed(&mut self, result: Result<SignalingLink, CamwatchError>) {
        self.dial_task = None;
        let peer_events = self.peer_event_handler();

        let negotiated = match self.channel.as_mut() {
            Some(channel) => match channel.complete_open(result) {
                Ok(()) => {
                    self.peers
                        .create_offer(channel, self.detection_requested, peer_events)
                        .await
                }
                Err(e) => Err(e),
            },
            None => return,
        };

        match negotiated {
            Ok(()) => {
                let next = SubsystemStates {
                    webrtc: self.peers.state(),
                    ..self.subsystems
                };
                self.update_subsystems(next);
                if let Some(reply) = self.pending_connect.take() {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(e) => match self.pending_connect.take() {
                Some(reply) => {
                    self.fail(&e).await;
                    let _ = reply.send(Err(e));
                }
                None => {
                    warn!("Reconnection attempt failed: {}", e);
                    self.warn_error(&e);
                    self.on_connection_lost(e.to_string()).await;
                }
            },
        }
    }

    async fn on_connection_lost(&mut self, reason: String) {
        if !self.state.is_live() {
            return;
        }
        warn!(
            camera_id = %self.camera_id,
            client_id = %self.client_id,
            "Connection lost: {}",
            reason
        );
        self.teardown_transport().await;

        match self.reconnect.on_failure() {
            ReconnectDecision::Retry { attempt, delay } => {
                self.set_state(SessionState::Reconnecting);
                self.emit(
                    StatusKind::Reconnect,
                    "scheduled",
                    json!({
                        "attempt": attempt,
                        "maxAttempts": self.reconnect.max_attempts(),
                        "delayMs": delay.as_millis() as u64,
                        "reason": reason,
                    }),
                );
                self.arm_reconnect_timer(attempt, delay);
            }
            ReconnectDecision::AlreadyScheduled => {
                debug!("Reconnection already scheduled");
            }
            ReconnectDecision::Exhausted { attempts } => {
                self.fail(&CamwatchError::ReconnectionExhausted { attempts })
                    .await;
            }
        }
    }

    fn start_reconnect_attempt(&mut self, attempt: u32) {
        self.reconnect_timer = None;
        if self.state != SessionState::Reconnecting {
            return;
        }
        info!(
            camera_id = %self.camera_id,
            attempt,
            "Reconnecting (attempt {}/{})",
            attempt,
            self.reconnect.max_attempts()
        );
        self.reconnect.begin_attempt();
        self.detection_requested = self.detection.is_active();
        self.start_dial();
    }

    /// Close socket, peer and sink binding of the current connection
    async fn teardown_transport(&mut self) {
        self.epoch += 1;
        if let Some(dial) = self.dial_task.take() {
            dial.abort();
        }
        self.telemetry.stop_sampling();
        self.peers.close().await;
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.sink.release();

        let next = SubsystemStates {
            websocket: SignalingState::Disconnected,
            webrtc: PeerState::Idle,
            video: VideoState::Idle,
            ..self.subsystems
        };
        self.update_subsystems(next);
    }

    async fn fail(&mut self, err: &CamwatchError) {
        error!(
            camera_id = %self.camera_id,
            client_id = %self.client_id,
            "Session failed: {}",
            err
        );
        self.emit(
            StatusKind::Error,
            err.error_code(),
            json!({ "message": err.to_string() }),
        );
        let failed = SubsystemStates {
            websocket: SignalingState::Failed,
            webrtc: PeerState::Failed,
            ..SubsystemStates::baseline()
        };
        self.cleanup(SessionState::Failed, failed).await;
    }

    async fn cleanup(&mut self, final_state: SessionState, final_subsystems: SubsystemStates) {
        if self.detection.is_active() || self.detection.pending().is_some() {
            if let Some(channel) = self.channel.as_ref().filter(|c| c.is_ready()) {
                let request =
                    SignalingMessage::detection_request(&self.camera_id, &self.client_id, false);
                if let Err(e) = channel.send(&request) {
                    debug!("Stop detection not sent: {}", e);
                }
            }
        }
        self.detection.reset();

        self.generation += 1;
        for timer in [self.toggle_timer.take(), self.reconnect_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
        self.telemetry.stop();

        self.teardown_transport().await;
        self.reconnect.reset();
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(CamwatchError::SessionClosed));
        }

        self.update_subsystems(final_subsystems);
        self.set_state(final_state);
    }

    // Signaling

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::StateChanged(state) => {
                let next = SubsystemStates {
                    websocket: state,
                    ..self.subsystems
                };
                self.update_subsystems(next);
            }
            ChannelEvent::Message(message) => self.on_signaling_message(message).await,
            ChannelEvent::Malformed { raw, reason } => {
                self.emit(
                    StatusKind::Warning,
                    "INVALID_MESSAGE",
                    json!({ "message": reason, "raw": raw }),
                );
            }
            ChannelEvent::Closed(close) => {
                self.on_connection_lost(format!(
                    "signaling closed with code {}: {}",
                    close.code, close.reason
                ))
                .await;
            }
        }
    }

    async fn on_signaling_message(&mut self, message: SignalingMessage) {
        match message {
            SignalingMessage::Answer(answer) => self.on_answer(answer.sdp.as_deref()).await,
            SignalingMessage::IceCandidate(message) => {
                if let Err(e) = self.peers.add_remote_ice_candidate(message.candidate).await {
                    self.warn_error(&e);
                }
            }
            SignalingMessage::DetectionStatus(status) => self.on_detection_status(status.state),
            SignalingMessage::DetectionEvent(message) => {
                let event = DetectionEvent::from_message(&self.camera_id, message);
                debug!(
                    "Detection event: probability {:.2}, {} people",
                    event.probability, event.people_count
                );
                (self.on_detection)(event);
            }
            SignalingMessage::Error(server) => {
                self.warn_error(&CamwatchError::Server {
                    message: server.message,
                });
            }
            other => debug!("Ignoring unexpected {} message", other.message_type()),
        }
    }

    async fn on_answer(&mut self, sdp: Option<&str>) {
        match self.peers.apply_answer(sdp).await {
            Ok(()) => {
                if matches!(
                    self.state,
                    SessionState::Connecting | SessionState::Reconnecting
                ) {
                    self.set_state(SessionState::Active);
                }
            }
            Err(e) => {
                warn!("Answer rejected: {}", e);
                self.warn_error(&e);
            }
        }
    }

    // Detection

    fn on_detection_status(&mut self, status: DetectionStatusKind) {
        if let Some(transition) = self.detection.apply_status(status) {
            self.apply_detection_transition(transition);
        }
        if self.detection.pending().is_none() {
            if let Some(timer) = self.toggle_timer.take() {
                timer.abort();
            }
        }
    }

    fn on_toggle_timeout(&mut self, token: u64) {
        if let Some((err, transition)) = self.detection.on_timeout(token) {
            self.toggle_timer = None;
            self.apply_detection_transition(transition);
            self.warn_error(&err);
        }
    }

    fn apply_detection_transition(&mut self, transition: DetectionTransition) {
        let next = SubsystemStates {
            detection: transition.to,
            ..self.subsystems
        };
        self.update_subsystems(next);
    }

    fn arm_toggle_timer(&mut self, token: u64) {
        if let Some(timer) = self.toggle_timer.take() {
            timer.abort();
        }
        let timeout = self.detection.timeout();
        let generation = self.generation;
        let inputs = self.inputs.clone();
        self.toggle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = inputs.send(SessionInput::ToggleTimeout { generation, token });
        }));
    }

    fn arm_reconnect_timer(&mut self, attempt: u32, delay: Duration) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        let generation = self.generation;
        let inputs = self.inputs.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inputs.send(SessionInput::ReconnectDue {
                generation,
                attempt,
            });
        }));
    }

    // Peer

    fn peer_event_handler(&self) -> PeerEventHandler {
        let inputs = self.inputs.clone();
        let epoch = self.epoch;
        Arc::new(move |event: PeerEvent| {
            let _ = inputs.send(SessionInput::Peer { epoch, event });
        })
    }

    fn video_event_handler(&self) -> VideoEventHandler {
        let inputs = self.inputs.clone();
        let epoch = self.epoch;
        Arc::new(move |event: VideoEvent| {
            let _ = inputs.send(SessionInput::Video { epoch, event });
        })
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if let Some(channel) = &self.channel {
                    if let Err(e) = self.peers.forward_local_candidate(channel, candidate) {
                        debug!("Local ICE candidate not forwarded: {}", e);
                    }
                }
            }
            PeerEvent::ConnectionState(state) => {
                let failed = self.peers.record_state(state);
                let next = SubsystemStates {
                    webrtc: state,
                    ..self.subsystems
                };
                self.update_subsystems(next);

                if state == PeerState::Connected {
                    self.reconnect.on_connected();
                    self.telemetry.mark_connected(Instant::now());
                }
                if failed {
                    self.on_connection_lost("peer connection failed".to_string())
                        .await;
                }
            }
            PeerEvent::IceState(state) => {
                let failed = self.peers.record_ice_state(state);
                self.emit(StatusKind::Ice, state.as_str(), Value::Null);
                if failed {
                    self.on_connection_lost("ICE connection failed".to_string())
                        .await;
                }
            }
            PeerEvent::Track(track) => {
                let events = self.video_event_handler();
                if let Err(e) = self
                    .peers
                    .bind_remote_track(self.sink.as_ref(), track, events)
                    .await
                {
                    warn!("Video playback did not start: {}", e);
                    self.warn_error(&e);
                }
            }
        }
    }

    // Video and telemetry

    async fn on_video_event(&mut self, event: VideoEvent) {
        if let VideoEvent::Error(reason) = &event {
            self.warn_error(&CamwatchError::VideoPlaybackError {
                reason: reason.clone(),
            });
        }

        let state = event.video_state();
        if state == VideoState::Playing {
            self.start_sampling().await;
        } else if self.telemetry.is_sampling() {
            debug!("Stats sampling paused on video {}", event.name());
            self.telemetry.stop_sampling();
        }

        let next = SubsystemStates {
            video: state,
            ..self.subsystems
        };
        self.update_subsystems(next);
    }

    async fn start_sampling(&mut self) {
        if self.telemetry.is_sampling() {
            return;
        }
        // The first sample is the baseline for the first window
        let inbound = self.peers.inbound_video_stats().await;
        self.telemetry
            .sample(Instant::now(), inbound, self.sink.playback_quality());

        let inputs = self.inputs.clone();
        let epoch = self.epoch;
        self.telemetry
            .start_sampling(move || inputs.send(SessionInput::StatsTick { epoch }).is_ok());
    }

    async fn sample_stats(&mut self) {
        if self.subsystems.video != VideoState::Playing {
            return;
        }
        let inbound = self.peers.inbound_video_stats().await;
        let sample = self
            .telemetry
            .sample(Instant::now(), inbound, self.sink.playback_quality());

        self.emit(
            StatusKind::Stats,
            self.subsystems.video.as_str(),
            serde_json::to_value(&sample.stats).unwrap_or(Value::Null),
        );
        if sample.newly_dropped > 0 {
            self.emit(
                StatusKind::Warning,
                "FRAMES_DROPPED",
                json!({
                    "dropped": sample.newly_dropped,
                    "totalDropped": sample.stats.dropped_frames,
                }),
            );
        }
    }

    fn start_heartbeat(&mut self) {
        if self.telemetry.is_heartbeat_running() {
            return;
        }
        let inputs = self.inputs.clone();
        let generation = self.generation;
        self.telemetry.start_heartbeat(move || {
            inputs
                .send(SessionInput::HeartbeatTick { generation })
                .is_ok()
        });
    }

    fn heartbeat(&mut self) {
        let status = self.snapshot();
        self.emit(StatusKind::Heartbeat, self.state.as_str(), status.to_details());
    }

    // Reporting

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        let from = self.state;
        self.state = next;
        info!(
            camera_id = %self.camera_id,
            client_id = %self.client_id,
            "Session {} -> {}",
            from,
            next
        );

        let mut details = json!({ "from": from.as_str() });
        if next == SessionState::Stopped {
            details["status"] = self.snapshot().to_details();
        }
        self.publish();
        self.emit(StatusKind::Session, next.as_str(), details);
    }

    /// Store `next`, emitting one event per subsystem that changed
    fn update_subsystems(&mut self, next: SubsystemStates) {
        let previous = self.subsystems;
        self.subsystems = next;

        if previous.websocket != next.websocket {
            self.emit_subsystem(
                StatusKind::Websocket,
                previous.websocket.as_str(),
                next.websocket.as_str(),
            );
        }
        if previous.webrtc != next.webrtc {
            self.emit_subsystem(
                StatusKind::Webrtc,
                previous.webrtc.as_str(),
                next.webrtc.as_str(),
            );
        }
        if previous.video != next.video {
            self.emit_subsystem(
                StatusKind::Video,
                previous.video.as_str(),
                next.video.as_str(),
            );
        }
        if previous.detection != next.detection {
            self.emit_subsystem(
                StatusKind::Detection,
                previous.detection.as_str(),
                next.detection.as_str(),
            );
        }
    }

    fn emit_subsystem(&self, kind: StatusKind, from: &str, to: &str) {
        debug!("{} {} -> {}", kind.as_str(), from, to);
        let details = match kind {
            StatusKind::Detection => json!({
                "from": from,
                "active": self.detection.is_active(),
            }),
            StatusKind::Webrtc => json!({
                "from": from,
                "connectionState": ConnectionState::from(self.subsystems.webrtc).as_str(),
            }),
            _ => json!({ "from": from }),
        };
        self.emit(kind, to, details);
    }

    fn warn_error(&self, err: &CamwatchError) {
        self.emit(
            StatusKind::Warning,
            err.error_code(),
            json!({ "message": err.to_string() }),
        );
    }

    fn emit(&self, kind: StatusKind, state: impl Into<String>, details: Value) {
        let event = StatusEvent::new(kind, state, self.client_id.as_str()).with_details(details);
        (self.observer)(event);
    }

    fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            camera_id: self.camera_id.clone(),
            client_id: self.client_id.clone(),
            session_state: self.state,
            connection_state: ConnectionState::from(self.subsystems.webrtc),
            detection_active: self.detection.is_active(),
            subsystems: self.subsystems,
            reconnect_attempts: self.reconnect.attempts(),
            uptime_secs: self.telemetry.uptime(Instant::now()).as_secs_f64(),
            stats: self.telemetry.stats().clone(),
        }
    }

    fn publish(&self) {
        let status = self.snapshot();
        let mut shared = self.shared.write();
        shared.status = status;
        shared.connected_at = self.telemetry.connected_at();
    }
}
