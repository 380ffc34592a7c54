use crate::config::ClientConfig;
use crate::protocol::client_events::ClientEvent;
use crate::protocol::server_events::ServerEvent;
use crate::transport::rest::{http_client, RealtimeRestAdapter};
use crate::{safe_truncate, Error, Result, TRACE_LOG_MAX_BYTES};

use super::event_log::{stamp_event_id, Event, EventLog, EventStream};
use super::platform::{
    AudioOutput, DataChannel, LogNotifier, MediaBackend, Notifier, PeerConfig, PeerConnection,
    PeerEvent, PeerEventSender,
};
use super::proxy::ProxyClient;
use super::tools::{PanelAction, ToolCallRequest, ToolPanel, ToolPanelView};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Inactive,
    Negotiating,
    Active,
}

/// Microphone permission as last observed, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrophoneStatus {
    Waiting,
    Requesting,
    Granted,
    Denied,
}

/// Handle to the actor owning one realtime connection at a time.
///
/// Cloning the handle is cheap; the actor stops (tearing down any live
/// session) once every handle is dropped.
#[derive(Clone)]
pub struct SessionController {
    sender: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    microphone: watch::Receiver<MicrophoneStatus>,
}

impl SessionController {
    /// Spawn a controller that reports alerts to the log.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn spawn(config: ClientConfig, backend: Arc<dyn MediaBackend>) -> Result<Self> {
        Self::spawn_with_notifier(config, backend, Arc::new(LogNotifier))
    }

    /// Spawn a controller with a host-provided alert sink.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn spawn_with_notifier(
        config: ClientConfig,
        backend: Arc<dyn MediaBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let http = http_client()?;
        let proxy = ProxyClient::new(http.clone(), config.server_url.clone());
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Inactive);
        let (mic_tx, mic_rx) = watch::channel(MicrophoneStatus::Waiting);

        let actor = Actor {
            panel: ToolPanel::new(config.instructions.clone()),
            negotiator: Arc::new(Negotiator {
                peer_config: PeerConfig { ice_servers: config.ice_servers.clone() },
                config,
                backend,
                proxy: proxy.clone(),
                http,
            }),
            proxy,
            notifier,
            state_tx,
            mic_tx,
            internal_tx,
            log: EventLog::new(),
            subscribers: Vec::new(),
            generation: 0,
            pending: None,
            live: None,
        };
        tokio::spawn(actor.run(cmd_rx, internal_rx));

        Ok(Self {
            sender: cmd_tx,
            state: state_rx,
            microphone: mic_rx,
        })
    }

    /// Acquire a credential, negotiate media and open the event channel.
    ///
    /// Resolves once the session is active or the attempt has failed; on
    /// failure the host has already been alerted and the state is inactive.
    ///
    /// # Errors
    /// Returns the error that aborted the start, `Error::SessionAlreadyStarted`
    /// if a session is live or negotiating, or `Error::Cancelled` if stopped
    /// meanwhile.
    pub async fn start(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Start { respond: tx }).await?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Tear the session down. Stopping an inactive controller is a no-op.
    ///
    /// # Errors
    /// Returns an error only if the controller has shut down.
    pub async fn stop(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Stop { respond: tx }).await?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Send a protocol event.
    ///
    /// # Errors
    /// Returns an error if no session is active, the channel is not open, or
    /// the send fails.
    pub async fn send(&self, event: ClientEvent) -> Result<()> {
        self.send_raw(serde_json::to_value(&event)?).await
    }

    /// Send an arbitrary JSON event; it must be an object with a `type`.
    ///
    /// # Errors
    /// Returns an error if no session is active, the channel is not open, the
    /// payload is not an event, or the send fails.
    pub async fn send_raw(&self, payload: Value) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Send { payload, respond: tx }).await?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Send a user text message and ask for a response.
    ///
    /// # Errors
    /// Returns an error if either send fails.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(ClientEvent::user_text(text)).await?;
        self.send(ClientEvent::response_create()).await
    }

    /// The event log, newest first.
    ///
    /// # Errors
    /// Returns an error if the controller has shut down.
    pub async fn events(&self) -> Result<Vec<Event>> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Events { respond: tx }).await?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Follow events as they are logged.
    ///
    /// # Errors
    /// Returns an error if the controller has shut down.
    pub async fn subscribe(&self) -> Result<EventStream> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Subscribe { respond: tx }).await?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// # Errors
    /// Returns an error if the controller has shut down.
    pub async fn tool_panel(&self) -> Result<ToolPanelView> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::ToolPanel { respond: tx }).await?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    #[must_use]
    pub fn microphone(&self) -> MicrophoneStatus {
        *self.microphone.borrow()
    }

    async fn command(&self, command: Command) -> Result<()> {
        self.sender.send(command).await.map_err(|_| Error::ConnectionClosed)
    }
}

enum Command {
    Start { respond: oneshot::Sender<Result<()>> },
    Stop { respond: oneshot::Sender<()> },
    Send { payload: Value, respond: oneshot::Sender<Result<()>> },
    Events { respond: oneshot::Sender<Vec<Event>> },
    Subscribe { respond: oneshot::Sender<EventStream> },
    ToolPanel { respond: oneshot::Sender<ToolPanelView> },
}

/// Completions of work the actor handed off, tagged with the session they
/// belong to.
enum Internal {
    Negotiated { generation: u64, outcome: Result<MediaParts> },
    Microphone { generation: u64, status: MicrophoneStatus },
    WelcomeDue { generation: u64 },
    SearchDone { generation: u64, call_id: String, outcome: Result<Value> },
}

/// Media resources of one session. Each slot is emptied as it is released.
#[derive(Default)]
struct MediaParts {
    peer: Option<Box<dyn PeerConnection>>,
    channel: Option<Box<dyn DataChannel>>,
    audio: Option<Box<dyn AudioOutput>>,
}

impl MediaParts {
    /// Release everything; a failing step never prevents the next one.
    fn teardown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if let Err(err) = channel.close() {
                error!("Error closing data channel: {err}");
            }
        }
        if let Some(mut peer) = self.peer.take() {
            if let Err(err) = peer.stop_tracks() {
                error!("Error stopping local tracks: {err}");
            }
            if let Err(err) = peer.close() {
                error!("Error closing peer connection: {err}");
            }
        }
        if let Some(mut audio) = self.audio.take() {
            if let Err(err) = audio.detach() {
                error!("Error cleaning up audio element: {err}");
            }
        }
    }
}

struct PendingStart {
    respond: oneshot::Sender<Result<()>>,
    peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
}

struct LiveSession {
    parts: MediaParts,
    /// Emptied once the host drops its sender.
    peer_rx: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    channel_open: bool,
    welcomed: bool,
}

/// Runs the start-up handshake outside the actor.
struct Negotiator {
    config: ClientConfig,
    peer_config: PeerConfig,
    backend: Arc<dyn MediaBackend>,
    proxy: ProxyClient,
    http: Client,
}

impl Negotiator {
    async fn run(
        &self,
        generation: u64,
        events: PeerEventSender,
        internal: &mpsc::UnboundedSender<Internal>,
    ) -> Result<MediaParts> {
        let mut parts = MediaParts::default();
        match self.build(&mut parts, generation, events, internal).await {
            Ok(()) => Ok(parts),
            Err(err) => {
                parts.teardown();
                Err(err)
            }
        }
    }

    async fn build(
        &self,
        parts: &mut MediaParts,
        generation: u64,
        events: PeerEventSender,
        internal: &mpsc::UnboundedSender<Internal>,
    ) -> Result<()> {
        let report = |status| {
            let _ = internal.send(Internal::Microphone { generation, status });
        };

        let token = self.proxy.fetch_token().await?;
        debug!("Ephemeral credential acquired");

        let peer = parts.peer.insert(self.backend.create_peer(&self.peer_config, events).await?);
        parts.audio = Some(self.backend.create_audio_output()?);

        report(MicrophoneStatus::Requesting);
        let track = match self.backend.open_microphone(&self.config.audio_constraints).await {
            Ok(track) => {
                report(MicrophoneStatus::Granted);
                info!(track = track.id(), "Microphone access granted");
                track
            }
            Err(err) => {
                report(MicrophoneStatus::Denied);
                return Err(err);
            }
        };
        peer.add_track(track)?;

        parts.channel = Some(peer.create_data_channel(&self.config.channel_label)?);

        let offer = peer.create_offer().await?;
        debug!("Created offer, sending to the realtime API");
        let signaling =
            RealtimeRestAdapter::with_client(self.http.clone(), &token, self.config.api_base_url.clone())?;
        let answer = signaling.post_sdp_offer(&self.config.model, offer).await?;
        debug!("Received SDP answer");

        peer.set_remote_answer(&answer).await?;
        Ok(())
    }
}

fn alert_message(err: &Error) -> String {
    match err {
        Error::Token(message) => format!("Error starting session: {message}"),
        Error::InvalidTokenResponse => "Error: Invalid token response from API".to_string(),
        Error::MicrophoneDenied(_) => {
            "Microphone access denied. Please allow microphone access and try again.".to_string()
        }
        Error::Sdp { status, body } => format!("SDP response error: {status} {body}"),
        _ => "Failed to start session. Check console for details.".to_string(),
    }
}

struct Actor {
    negotiator: Arc<Negotiator>,
    proxy: ProxyClient,
    notifier: Arc<dyn Notifier>,
    state_tx: watch::Sender<SessionState>,
    mic_tx: watch::Sender<MicrophoneStatus>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    log: EventLog,
    subscribers: Vec<mpsc::UnboundedSender<Event>>,
    panel: ToolPanel,
    generation: u64,
    pending: Option<PendingStart>,
    live: Option<LiveSession>,
}

async fn next_peer_event(live: &mut Option<LiveSession>) -> Option<PeerEvent> {
    match live.as_mut().and_then(|session| session.peer_rx.as_mut()) {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            // Host callbacks already queued are applied before the next command.
            tokio::select! {
                biased;
                Some(msg) = internal.recv() => self.handle_internal(msg),
                evt = next_peer_event(&mut self.live) => {
                    match evt {
                        Some(evt) => self.handle_peer_event(evt),
                        None => {
                            debug!("Peer event channel closed");
                            if let Some(live) = self.live.as_mut() {
                                live.channel_open = false;
                                live.peer_rx = None;
                            }
                        }
                    }
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
            }
        }

        if let Some(mut live) = self.live.take() {
            live.parts.teardown();
        }
        debug!("Session controller stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { respond } => self.start(respond),
            Command::Stop { respond } => {
                self.stop();
                let _ = respond.send(());
            }
            Command::Send { payload, respond } => {
                let result = self.send_payload(payload);
                if let Err(err) = &result {
                    warn!("Event not sent: {err}");
                }
                let _ = respond.send(result);
            }
            Command::Events { respond } => {
                let _ = respond.send(self.log.snapshot());
            }
            Command::Subscribe { respond } => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.subscribers.push(tx);
                let _ = respond.send(EventStream::new(rx));
            }
            Command::ToolPanel { respond } => {
                let _ = respond.send(self.panel.view());
            }
        }
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Negotiated { generation, outcome } => self.on_negotiated(generation, outcome),
            Internal::Microphone { generation, status } => {
                if generation == self.generation {
                    self.mic_tx.send_replace(status);
                }
            }
            Internal::WelcomeDue { generation } => self.on_welcome_due(generation),
            Internal::SearchDone { generation, call_id, outcome } => {
                if generation != self.generation || self.live.is_none() {
                    debug!(%call_id, "Dropping search result for a closed session");
                    return;
                }
                let actions = self.panel.complete(&call_id, outcome);
                self.apply(actions);
            }
        }
    }

    fn start(&mut self, respond: oneshot::Sender<Result<()>>) {
        if self.live.is_some() || self.pending.is_some() {
            let _ = respond.send(Err(Error::SessionAlreadyStarted));
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        self.pending = Some(PendingStart { respond, peer_rx });
        self.set_state(SessionState::Negotiating);
        info!(generation, "Starting session");

        let negotiator = Arc::clone(&self.negotiator);
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let outcome = negotiator.run(generation, peer_tx, &internal).await;
            let _ = internal.send(Internal::Negotiated { generation, outcome });
        });
    }

    fn on_negotiated(&mut self, generation: u64, outcome: Result<MediaParts>) {
        let pending = if generation == self.generation { self.pending.take() } else { None };
        let Some(pending) = pending else {
            if let Ok(mut parts) = outcome {
                info!(generation, "Discarding media negotiated for a stopped session");
                parts.teardown();
            }
            return;
        };

        match outcome {
            Ok(parts) => {
                self.live = Some(LiveSession {
                    parts,
                    peer_rx: Some(pending.peer_rx),
                    channel_open: false,
                    welcomed: false,
                });
                self.set_state(SessionState::Active);
                info!(generation, "Session initialized successfully");
                let _ = pending.respond.send(Ok(()));
            }
            Err(err) => {
                error!("Error starting session: {err}");
                self.notifier.alert(&alert_message(&err));
                self.set_state(SessionState::Inactive);
                let _ = pending.respond.send(Err(err));
            }
        }
    }

    fn stop(&mut self) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.respond.send(Err(Error::Cancelled));
        }
        if let Some(mut live) = self.live.take() {
            live.parts.teardown();
        }
        // Late completions from the old session no longer match.
        self.generation += 1;
        self.log.clear();
        self.panel.reset();
        self.mic_tx.send_replace(MicrophoneStatus::Waiting);
        self.set_state(SessionState::Inactive);
        info!("Session stopped");
    }

    fn handle_peer_event(&mut self, event: PeerEvent) {
        let generation = self.generation;
        let Some(live) = self.live.as_mut() else {
            return;
        };

        match event {
            PeerEvent::ChannelOpen => {
                info!("Data channel opened");
                live.channel_open = true;
                if !live.welcomed {
                    live.welcomed = true;
                    let delay = self.negotiator.config.welcome_delay;
                    let internal = self.internal_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = internal.send(Internal::WelcomeDue { generation });
                    });
                }
            }
            PeerEvent::ChannelClosed => {
                info!("Data channel closed");
                live.channel_open = false;
            }
            PeerEvent::ChannelError(err) => error!("Data channel error: {err}"),
            PeerEvent::ChannelMessage(text) => self.on_message(&text),
            PeerEvent::ConnectionState(state) => info!("WebRTC connection state: {state}"),
            PeerEvent::IceConnectionState(state) => info!("ICE connection state: {state}"),
            PeerEvent::RemoteTrack { stream_id } => {
                debug!(%stream_id, "Received audio track from model");
                if let Some(audio) = live.parts.audio.as_mut() {
                    if let Err(err) = audio.play(&stream_id) {
                        error!("Audio play error: {err}");
                    }
                }
            }
        }
    }

    fn on_message(&mut self, text: &str) {
        let event = match Event::inbound(text) {
            Ok(event) => event,
            Err(err) => {
                warn!("Error parsing data channel message: {err}");
                return;
            }
        };
        trace!("Received event: {}", safe_truncate(text, TRACE_LOG_MAX_BYTES));

        let server_event = ServerEvent::from_value(event.payload());
        if let ServerEvent::Error { error, .. } = &server_event {
            warn!(%error, "Realtime API reported an error");
        }
        self.record(event);

        let actions = self.panel.observe(&server_event);
        self.apply(actions);
    }

    fn on_welcome_due(&mut self, generation: u64) {
        if generation != self.generation || self.live.is_none() {
            return;
        }
        let welcome = ClientEvent::user_text(self.negotiator.config.welcome_text.clone());
        for event in [welcome, ClientEvent::response_create()] {
            if let Err(err) = self.send_event(&event) {
                warn!("Welcome message not sent: {err}");
                return;
            }
        }
    }

    fn apply(&mut self, actions: Vec<PanelAction>) {
        for action in actions {
            match action {
                PanelAction::Send(event) => {
                    if let Err(err) = self.send_event(&event) {
                        warn!("Tool panel event not sent: {err}");
                    }
                }
                PanelAction::Search(request) => self.spawn_search(request),
            }
        }
    }

    fn spawn_search(&self, request: ToolCallRequest) {
        let generation = self.generation;
        let proxy = self.proxy.clone();
        let internal = self.internal_tx.clone();
        info!(query = %request.query, call_id = %request.call_id, "Searching");
        tokio::spawn(async move {
            let outcome = proxy.search(&request.query).await;
            let _ = internal.send(Internal::SearchDone {
                generation,
                call_id: request.call_id,
                outcome,
            });
        });
    }

    #[allow(clippy::result_large_err)]
    fn send_event(&mut self, event: &ClientEvent) -> Result<()> {
        self.send_payload(serde_json::to_value(event)?)
    }

    #[allow(clippy::result_large_err)]
    fn send_payload(&mut self, mut payload: Value) -> Result<()> {
        let live = self.live.as_mut().ok_or(Error::SessionInactive)?;
        if !live.channel_open {
            return Err(Error::ChannelNotOpen);
        }
        let channel = live.parts.channel.as_mut().ok_or(Error::ChannelNotOpen)?;

        stamp_event_id(&mut payload)?;
        let json = serde_json::to_string(&payload)?;
        channel.send(&json)?;
        trace!("Sending event: {}", safe_truncate(&json, TRACE_LOG_MAX_BYTES));

        self.record(Event::outbound(payload));
        Ok(())
    }

    fn record(&mut self, event: Event) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        self.log.push(event);
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }
}
