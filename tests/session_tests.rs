use async_trait::async_trait;
use futures::StreamExt;
use oai_rt_voice::client::{
    AudioConstraints, AudioOutput, AudioTrack, DataChannel, Direction, MediaBackend, Notifier,
    PeerConfig, PeerConnection, PeerEvent, PeerEventSender,
};
use oai_rt_voice::protocol::models::DEFAULT_MODEL;
use oai_rt_voice::{ClientConfig, Error, MicrophoneStatus, SessionController, SessionState};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "ek_test";
const OFFER: &str = "v=0\r\no=- offer\r\n";
const ANSWER: &str = "v=0\r\no=- answer\r\n";

/// Records every platform call in order.
#[derive(Default)]
struct Journal {
    calls: Mutex<Vec<String>>,
    peer_config: Mutex<Option<PeerConfig>>,
    remote_answer: Mutex<Option<String>>,
    events: Mutex<Option<PeerEventSender>>,
}

impl Journal {
    fn push(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn saw(&self, call: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == call)
    }
}

#[derive(Default, Clone, Copy)]
struct Options {
    deny_microphone: bool,
    fail_channel_close: bool,
    welcome_delay: Option<Duration>,
}

struct MockBackend {
    journal: Arc<Journal>,
    sent: mpsc::UnboundedSender<Value>,
    options: Options,
}

struct MockTrack;

impl AudioTrack for MockTrack {
    fn id(&self) -> &str {
        "mic-0"
    }
}

struct MockPeer {
    journal: Arc<Journal>,
    sent: mpsc::UnboundedSender<Value>,
    fail_channel_close: bool,
}

struct MockChannel {
    journal: Arc<Journal>,
    sent: mpsc::UnboundedSender<Value>,
    fail_close: bool,
}

struct MockAudio {
    journal: Arc<Journal>,
}

impl DataChannel for MockChannel {
    fn send(&mut self, text: &str) -> oai_rt_voice::Result<()> {
        let frame: Value = serde_json::from_str(text)?;
        let _ = self.sent.send(frame);
        Ok(())
    }

    fn close(&mut self) -> oai_rt_voice::Result<()> {
        self.journal.push("channel.close");
        if self.fail_close {
            return Err(Error::Media("channel already closing".to_string()));
        }
        Ok(())
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.journal.push("drop:channel");
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    fn add_track(&mut self, track: Box<dyn AudioTrack>) -> oai_rt_voice::Result<()> {
        self.journal.push(format!("add_track:{}", track.id()));
        Ok(())
    }

    fn create_data_channel(&mut self, label: &str) -> oai_rt_voice::Result<Box<dyn DataChannel>> {
        self.journal.push(format!("create_data_channel:{label}"));
        Ok(Box::new(MockChannel {
            journal: Arc::clone(&self.journal),
            sent: self.sent.clone(),
            fail_close: self.fail_channel_close,
        }))
    }

    async fn create_offer(&mut self) -> oai_rt_voice::Result<String> {
        self.journal.push("create_offer");
        Ok(OFFER.to_string())
    }

    async fn set_remote_answer(&mut self, sdp: &str) -> oai_rt_voice::Result<()> {
        self.journal.push("set_remote_answer");
        *self.journal.remote_answer.lock().unwrap() = Some(sdp.to_string());
        Ok(())
    }

    fn stop_tracks(&mut self) -> oai_rt_voice::Result<()> {
        self.journal.push("stop_tracks");
        Ok(())
    }

    fn close(&mut self) -> oai_rt_voice::Result<()> {
        self.journal.push("peer.close");
        Ok(())
    }
}

impl Drop for MockPeer {
    fn drop(&mut self) {
        self.journal.push("drop:peer");
    }
}

impl AudioOutput for MockAudio {
    fn play(&mut self, stream_id: &str) -> oai_rt_voice::Result<()> {
        self.journal.push(format!("audio.play:{stream_id}"));
        Ok(())
    }

    fn detach(&mut self) -> oai_rt_voice::Result<()> {
        self.journal.push("audio.detach");
        Ok(())
    }
}

impl Drop for MockAudio {
    fn drop(&mut self) {
        self.journal.push("drop:audio");
    }
}

#[async_trait]
impl MediaBackend for MockBackend {
    async fn create_peer(
        &self,
        config: &PeerConfig,
        events: PeerEventSender,
    ) -> oai_rt_voice::Result<Box<dyn PeerConnection>> {
        self.journal.push("create_peer");
        *self.journal.peer_config.lock().unwrap() = Some(config.clone());
        *self.journal.events.lock().unwrap() = Some(events);
        Ok(Box::new(MockPeer {
            journal: Arc::clone(&self.journal),
            sent: self.sent.clone(),
            fail_channel_close: self.options.fail_channel_close,
        }))
    }

    fn create_audio_output(&self) -> oai_rt_voice::Result<Box<dyn AudioOutput>> {
        self.journal.push("create_audio_output");
        Ok(Box::new(MockAudio { journal: Arc::clone(&self.journal) }))
    }

    async fn open_microphone(
        &self,
        constraints: &AudioConstraints,
    ) -> oai_rt_voice::Result<Box<dyn AudioTrack>> {
        self.journal.push("open_microphone");
        assert!(constraints.echo_cancellation);
        if self.options.deny_microphone {
            return Err(Error::MicrophoneDenied("NotAllowedError".to_string()));
        }
        Ok(Box::new(MockTrack))
    }
}

struct RecordingNotifier(Arc<Mutex<Vec<String>>>);

impl Notifier for RecordingNotifier {
    fn alert(&self, message: &str) {
        self.0.lock().unwrap().push(message.to_string());
    }
}

struct Harness {
    controller: SessionController,
    journal: Arc<Journal>,
    sent: mpsc::UnboundedReceiver<Value>,
    alerts: Arc<Mutex<Vec<String>>>,
    server: MockServer,
}

impl Harness {
    async fn new(options: Options) -> Self {
        let server = MockServer::start().await;
        let journal = Arc::new(Journal::default());
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let backend = Arc::new(MockBackend {
            journal: Arc::clone(&journal),
            sent: sent_tx,
            options,
        });
        let alerts = Arc::new(Mutex::new(Vec::new()));
        let config = ClientConfig {
            server_url: server.uri(),
            api_base_url: format!("{}/v1", server.uri()),
            // Long enough that the greeting never interleaves unless asked for.
            welcome_delay: options.welcome_delay.unwrap_or(Duration::from_secs(3600)),
            ..ClientConfig::default()
        };
        let controller = SessionController::spawn_with_notifier(
            config,
            backend,
            Arc::new(RecordingNotifier(Arc::clone(&alerts))),
        )
        .unwrap();

        Self { controller, journal, sent, alerts, server }
    }

    async fn mount_token(&self, body: Value) {
        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    async fn mount_answer(&self) {
        Mock::given(method("POST"))
            .and(path("/v1/realtime"))
            .and(query_param("model", DEFAULT_MODEL))
            .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
            .and(header("content-type", "application/sdp"))
            .and(body_string(OFFER))
            .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER))
            .mount(&self.server)
            .await;
    }

    /// Start a session and open its data channel.
    async fn activate(&self) {
        self.mount_token(token_body()).await;
        self.mount_answer().await;
        self.controller.start().await.unwrap();
        self.emit(PeerEvent::ChannelOpen);
    }

    fn emit(&self, event: PeerEvent) {
        self.journal
            .events
            .lock()
            .unwrap()
            .as_ref()
            .expect("peer created")
            .send(event)
            .unwrap();
    }

    fn inbound(&self, payload: &Value) {
        self.emit(PeerEvent::ChannelMessage(payload.to_string()));
    }

    async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.sent.recv())
            .await
            .expect("frame sent in time")
            .expect("channel alive")
    }

    async fn assert_quiet(&mut self, window: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(window, self.sent.recv()).await {
            panic!("unexpected frame: {frame}");
        }
    }

    async fn wait_for_call(&self, call: &str) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !self.journal.saw(call) {
            assert!(Instant::now() < deadline, "{call} never happened: {:?}", self.journal.calls());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap().clone()
    }
}

fn token_body() -> Value {
    json!({ "id": "sess_1", "client_secret": { "value": TOKEN, "expires_at": 1_735_000_000 } })
}

fn tool_call(id: &str, arguments: &str) -> Value {
    json!({
        "type": "response.tool_call",
        "event_id": format!("evt_{id}"),
        "tool_call": { "id": id, "name": "search_documentation", "arguments": arguments }
    })
}

fn organic_results(count: usize) -> Value {
    let hits: Vec<Value> = (0..count)
        .map(|i| json!({
            "position": i + 1,
            "title": format!("Result {i}"),
            "link": format!("https://example.com/{i}"),
            "snippet": format!("Snippet {i}"),
            "favicon": "https://example.com/favicon.ico"
        }))
        .collect();
    json!({ "organic_results": hits })
}

fn tool_content(frame: &Value) -> Value {
    serde_json::from_str(frame["content"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn start_negotiates_media_in_order() {
    let h = Harness::new(Options::default()).await;
    h.mount_token(token_body()).await;
    h.mount_answer().await;

    h.controller.start().await.unwrap();

    assert_eq!(h.controller.state(), SessionState::Active);
    assert_eq!(h.controller.microphone(), MicrophoneStatus::Granted);
    assert_eq!(
        h.journal.calls(),
        [
            "create_peer",
            "create_audio_output",
            "open_microphone",
            "add_track:mic-0",
            "create_data_channel:oai-events",
            "create_offer",
            "set_remote_answer",
        ]
    );
    assert_eq!(h.journal.remote_answer.lock().unwrap().as_deref(), Some(ANSWER));
    let peer_config = h.journal.peer_config.lock().unwrap().clone().unwrap();
    let urls: Vec<_> = peer_config.ice_servers.iter().map(|s| s.urls.as_str()).collect();
    assert_eq!(urls, ["stun:stun.l.google.com:19302", "stun:stun1.l.google.com:19302"]);
    assert!(h.alerts().is_empty());
}

#[tokio::test]
async fn welcome_is_sent_once_after_the_delay() {
    let mut h = Harness::new(Options {
        welcome_delay: Some(Duration::from_secs(1)),
        ..Options::default()
    })
    .await;
    h.mount_token(token_body()).await;
    h.mount_answer().await;
    h.controller.start().await.unwrap();

    let opened = Instant::now();
    h.emit(PeerEvent::ChannelOpen);

    let greeting = h.next_frame().await;
    assert!(opened.elapsed() >= Duration::from_secs(1));
    assert_eq!(greeting["type"], "conversation.item.create");
    assert_eq!(greeting["item"]["role"], "user");
    assert_eq!(greeting["item"]["content"][0]["type"], "input_text");
    assert_eq!(greeting["item"]["content"][0]["text"], "Hello Jose, can you introduce yourself?");

    let response = h.next_frame().await;
    assert_eq!(response["type"], "response.create");
    assert_ne!(greeting["event_id"], response["event_id"]);

    // A reopened channel does not greet again.
    h.emit(PeerEvent::ChannelClosed);
    h.emit(PeerEvent::ChannelOpen);
    h.assert_quiet(Duration::from_millis(1500)).await;

    let events = h.controller.events().await.unwrap();
    let kinds: Vec<_> = events.iter().map(|e| e.kind().to_string()).collect();
    assert_eq!(kinds, ["response.create", "conversation.item.create"]);
    assert!(events.iter().all(|e| e.direction() == Direction::Outbound));
}

#[tokio::test]
async fn token_error_alerts_and_leaves_session_inactive() {
    let h = Harness::new(Options::default()).await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "No API key configured" })))
        .mount(&h.server)
        .await;

    let err = h.controller.start().await.unwrap_err();

    assert!(matches!(err, Error::Token(ref m) if m == "No API key configured"));
    assert_eq!(h.alerts(), ["Error starting session: No API key configured"]);
    assert_eq!(h.controller.state(), SessionState::Inactive);
    assert!(h.journal.calls().is_empty());
}

#[tokio::test]
async fn token_without_secret_is_rejected() {
    for body in [
        json!({ "id": "sess_1" }),
        json!({ "client_secret": { "expires_at": 1 } }),
        json!({ "client_secret": { "value": null } }),
        json!({ "client_secret": { "value": "" } }),
    ] {
        let h = Harness::new(Options::default()).await;
        h.mount_token(body.clone()).await;

        let err = h.controller.start().await.unwrap_err();

        assert!(matches!(err, Error::InvalidTokenResponse), "{body}: {err}");
        assert_eq!(h.alerts(), ["Error: Invalid token response from API"]);
        assert_eq!(h.controller.state(), SessionState::Inactive);
        assert!(h.journal.calls().is_empty());
    }
}

#[tokio::test]
async fn denied_microphone_releases_partial_media() {
    let h = Harness::new(Options { deny_microphone: true, ..Options::default() }).await;
    h.mount_token(token_body()).await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER))
        .expect(0)
        .mount(&h.server)
        .await;

    let err = h.controller.start().await.unwrap_err();

    assert!(matches!(err, Error::MicrophoneDenied(_)));
    assert_eq!(h.controller.microphone(), MicrophoneStatus::Denied);
    assert_eq!(h.controller.state(), SessionState::Inactive);
    assert_eq!(
        h.alerts(),
        ["Microphone access denied. Please allow microphone access and try again."]
    );
    assert!(h.journal.saw("peer.close"));
    assert!(h.journal.saw("audio.detach"));
    assert!(!h.journal.saw("create_offer"));
}

#[tokio::test]
async fn rejected_offer_alerts_with_status_and_body() {
    let h = Harness::new(Options::default()).await;
    h.mount_token(token_body()).await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid ephemeral key"))
        .mount(&h.server)
        .await;

    let err = h.controller.start().await.unwrap_err();

    assert!(matches!(err, Error::Sdp { status: 401, .. }));
    assert_eq!(h.alerts(), ["SDP response error: 401 invalid ephemeral key"]);
    assert_eq!(h.controller.state(), SessionState::Inactive);
    assert!(h.journal.saw("channel.close"));
    assert!(h.journal.saw("peer.close"));
    assert!(!h.journal.saw("set_remote_answer"));
}

#[tokio::test]
async fn second_start_is_refused_while_active() {
    let h = Harness::new(Options::default()).await;
    h.activate().await;

    let err = h.controller.start().await.unwrap_err();

    assert!(matches!(err, Error::SessionAlreadyStarted));
    assert_eq!(h.controller.state(), SessionState::Active);
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let h = Harness::new(Options::default()).await;
    h.activate().await;

    h.emit(PeerEvent::ChannelMessage("not json".to_string()));
    h.emit(PeerEvent::ChannelMessage("[1,2,3]".to_string()));
    h.emit(PeerEvent::ChannelMessage(r#"{"event_id":"evt_1"}"#.to_string()));
    h.inbound(&json!({ "type": "rate_limits.updated", "event_id": "evt_2" }));

    let events = h.controller.events().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), "rate_limits.updated");
    assert_eq!(events[0].direction(), Direction::Inbound);
    assert_eq!(h.controller.state(), SessionState::Active);
}

#[tokio::test]
async fn subscribers_follow_the_log_until_the_controller_goes_away() {
    let h = Harness::new(Options::default()).await;
    h.activate().await;
    let mut stream = h.controller.subscribe().await.unwrap();

    h.inbound(&json!({ "type": "input_audio_buffer.speech_started", "event_id": "evt_in" }));
    h.controller
        .send_raw(json!({ "type": "response.create", "event_id": "evt_out" }))
        .await
        .unwrap();

    let first = stream.next_event().await.unwrap();
    assert_eq!(first.direction(), Direction::Inbound);
    assert_eq!(first.event_id(), Some("evt_in"));
    let second = stream.next().await.unwrap();
    assert_eq!(second.direction(), Direction::Outbound);
    assert_eq!(second.event_id(), Some("evt_out"));

    let Harness { controller, .. } = h;
    drop(controller);
    let end = tokio::time::timeout(Duration::from_secs(5), stream.next()).await.unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn outbound_events_get_ids_unless_they_have_one() {
    let mut h = Harness::new(Options::default()).await;
    h.activate().await;

    h.controller.send_raw(json!({ "type": "response.create" })).await.unwrap();
    h.controller
        .send_raw(json!({ "type": "response.create", "event_id": "evt_custom" }))
        .await
        .unwrap();

    let generated = h.next_frame().await;
    let custom = h.next_frame().await;
    let generated_id = generated["event_id"].as_str().unwrap();
    assert!(!generated_id.is_empty());
    assert_eq!(custom["event_id"], "evt_custom");

    let events = h.controller.events().await.unwrap();
    let ids: Vec<_> = events.iter().map(|e| e.event_id().unwrap().to_string()).collect();
    assert_eq!(ids, ["evt_custom", generated_id]);
}

#[tokio::test]
async fn sends_are_rejected_without_an_open_channel() {
    let h = Harness::new(Options::default()).await;

    let err = h.controller.send_text("hello").await.unwrap_err();
    assert!(matches!(err, Error::SessionInactive));

    h.mount_token(token_body()).await;
    h.mount_answer().await;
    h.controller.start().await.unwrap();

    let err = h.controller.send_raw(json!({ "type": "response.create" })).await.unwrap_err();
    assert!(matches!(err, Error::ChannelNotOpen));

    h.emit(PeerEvent::ChannelOpen);
    let err = h.controller.send_raw(json!({ "event_id": "x" })).await.unwrap_err();
    assert!(matches!(err, Error::InvalidEvent(_)));
    assert!(h.controller.events().await.unwrap().is_empty());
}

#[tokio::test]
async fn tools_are_declared_once_per_session() {
    let mut h = Harness::new(Options::default()).await;
    h.activate().await;

    h.inbound(&json!({ "type": "session.created", "event_id": "evt_1", "session": { "id": "sess_1" } }));
    h.inbound(&json!({ "type": "session.created", "event_id": "evt_2", "session": { "id": "sess_1" } }));

    let update = h.next_frame().await;
    assert_eq!(update["type"], "session.update");
    let tool = &update["session"]["tools"][0];
    assert_eq!(tool["type"], "function");
    assert_eq!(tool["name"], "search_documentation");
    assert_eq!(tool["parameters"]["required"], json!(["query"]));
    assert_eq!(tool["parameters"]["strict"], true);
    assert_eq!(update["session"]["tool_choice"], "auto");
    h.assert_quiet(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn tool_call_runs_one_search_and_answers_with_top_results() {
    let mut h = Harness::new(Options::default()).await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "kubernetes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(organic_results(5)))
        .expect(1)
        .mount(&h.server)
        .await;
    h.activate().await;

    h.inbound(&tool_call("call_42", r#"{"query":"kubernetes"}"#));

    let frame = h.next_frame().await;
    assert_eq!(frame["type"], "tool_call.response");
    assert_eq!(frame["tool_call_id"], "call_42");
    let content = tool_content(&frame);
    let results = content["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], json!({
        "title": "Result 0",
        "link": "https://example.com/0",
        "snippet": "Snippet 0"
    }));
    assert!(content.get("error").is_none());

    let view = h.controller.tool_panel().await.unwrap();
    assert!(!view.searching);
    assert_eq!(view.last_query.as_deref(), Some("kubernetes"));
    assert_eq!(view.last_results, Some(organic_results(5)));
}

#[tokio::test]
async fn overlapping_tool_calls_are_answered_in_order() {
    let mut h = Harness::new(Options::default()).await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "helm"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(organic_results(1))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "terraform"))
        .respond_with(ResponseTemplate::new(200).set_body_json(organic_results(2)))
        .expect(1)
        .mount(&h.server)
        .await;
    h.activate().await;

    h.inbound(&tool_call("call_a", r#"{"query":"helm"}"#));
    h.inbound(&tool_call("call_b", r#"{"query":"terraform"}"#));

    let first = h.next_frame().await;
    let second = h.next_frame().await;
    assert_eq!(first["tool_call_id"], "call_a");
    assert_eq!(tool_content(&first)["results"].as_array().unwrap().len(), 1);
    assert_eq!(second["tool_call_id"], "call_b");
    assert_eq!(tool_content(&second)["results"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn failed_search_answers_with_an_error_payload() {
    let mut h = Harness::new(Options::default()).await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string("upstream timeout"))
        .mount(&h.server)
        .await;
    h.activate().await;

    h.inbound(&tool_call("call_1", r#"{"query":"istio"}"#));

    let frame = h.next_frame().await;
    assert_eq!(frame["tool_call_id"], "call_1");
    assert_eq!(
        tool_content(&frame),
        json!({ "error": "Failed to retrieve search results", "results": [] })
    );
}

#[tokio::test]
async fn undecodable_arguments_are_answered_without_searching() {
    let mut h = Harness::new(Options::default()).await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(organic_results(1)))
        .expect(0)
        .mount(&h.server)
        .await;
    h.activate().await;

    h.inbound(&tool_call("call_1", "{not json"));

    let frame = h.next_frame().await;
    assert_eq!(frame["tool_call_id"], "call_1");
    assert_eq!(tool_content(&frame)["error"], "Invalid tool arguments");
}

#[tokio::test]
async fn remote_audio_is_routed_to_the_output() {
    let h = Harness::new(Options::default()).await;
    h.activate().await;

    h.emit(PeerEvent::ConnectionState("connected".to_string()));
    h.emit(PeerEvent::RemoteTrack { stream_id: "stream-1".to_string() });

    h.wait_for_call("audio.play:stream-1").await;
}

#[tokio::test]
async fn stop_releases_everything_even_when_a_step_fails() {
    let h = Harness::new(Options { fail_channel_close: true, ..Options::default() }).await;
    h.activate().await;
    h.inbound(&json!({ "type": "rate_limits.updated" }));
    assert_eq!(h.controller.events().await.unwrap().len(), 1);

    h.controller.stop().await.unwrap();

    assert_eq!(h.controller.state(), SessionState::Inactive);
    assert_eq!(h.controller.microphone(), MicrophoneStatus::Waiting);
    assert!(h.controller.events().await.unwrap().is_empty());
    for call in ["channel.close", "stop_tracks", "peer.close", "audio.detach"] {
        assert!(h.journal.saw(call), "missing {call}");
    }
    for dropped in ["drop:channel", "drop:peer", "drop:audio"] {
        assert!(h.journal.saw(dropped), "missing {dropped}");
    }

    let err = h.controller.send_text("still there?").await.unwrap_err();
    assert!(matches!(err, Error::SessionInactive));

    // Stopping twice is harmless.
    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn search_finishing_after_stop_is_discarded() {
    let mut h = Harness::new(Options::default()).await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(organic_results(3))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&h.server)
        .await;
    h.activate().await;

    h.inbound(&tool_call("call_1", r#"{"query":"argo"}"#));
    // Let the search request leave before stopping.
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.controller.stop().await.unwrap();

    h.assert_quiet(Duration::from_millis(600)).await;
    assert!(h.controller.events().await.unwrap().is_empty());
    let view = h.controller.tool_panel().await.unwrap();
    assert_eq!(view.last_query, None);
}

#[tokio::test]
async fn stop_during_negotiation_cancels_and_discards_media() {
    let h = Harness::new(Options::default()).await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body())
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&h.server)
        .await;
    h.mount_answer().await;

    let controller = h.controller.clone();
    let start = tokio::spawn(async move { controller.start().await });
    let mut state = h.controller.watch_state();
    state.wait_for(|s| *s == SessionState::Negotiating).await.unwrap();

    h.controller.stop().await.unwrap();

    let err = start.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(h.controller.state(), SessionState::Inactive);

    // The handshake still completes in the background; its media is released.
    h.wait_for_call("peer.close").await;
    assert_eq!(h.controller.state(), SessionState::Inactive);
    assert!(h.alerts().is_empty());
}
