//! # Live Voice WebSocket Handler
//!
//! One browser connection to `/ws/live` hosts one live voice session. The socket
//! actor is the presentation layer of the session: it relays browser input into the
//! `ClientBridge` devices and turns controller notices into JSON messages.
//!
//! ## WebSocket Protocol:
//! 1. **Start**: Client sends `start_session` with its current scanner text
//! 2. **Permission**: Server sends `microphone_request`, client answers `microphone`
//! 3. **Audio Streaming**: Binary frames carry little-endian `f32` mono samples
//! 4. **Playback**: Server sends `playback` buffers (base64 PCM16) with their start
//!    time on the output clock, and `playback_stop` when the user interrupts
//! 5. **Transcripts**: `transcript` while a turn is in progress, `turn_complete` at its end
//! 6. **Stop**: Client sends `stop_session` or simply closes the socket
//!
//! ## Message Format:
//! - **Client → Server**: JSON `{"type": ...}` text frames, binary sample frames
//! - **Server → Client**: JSON `{"type": ...}` text frames only

use crate::audio::pcm::samples_from_f32_le;
use crate::audio::playback::SourceId;
use crate::error::LiveError;
use crate::live::client::{BridgeOutput, ClientAudioDevices, ClientBridge};
use crate::live::gemini::GeminiLiveConnector;
use crate::live::transcript::TranscriptState;
use crate::live::{LiveSettings, SessionController, SessionNotice, SessionPhase};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};
use tracing::{debug, error, info, trace, warn};

/// Messages the browser sends.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Begin a live session. `context` is the scanner-editor content: usually
    /// JSON text, but an already-parsed object is accepted too.
    StartSession {
        #[serde(default)]
        context: Value,
    },

    /// Answer to `microphone_request`
    Microphone { granted: bool },

    StopSession,

    /// Speak `text` on the live playback timeline
    Narrate { text: String },

    /// Heartbeat response
    Pong { timestamp: u64 },
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Message)]
#[rtype(result = "()")]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionStatus {
        status: SessionPhase,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    MicrophoneRequest,

    Playback {
        source_id: SourceId,
        /// Seconds on the session output clock
        start_at: f64,
        duration: f64,
        sample_rate: u32,
        /// Base64 PCM16 little-endian
        data: String,
    },

    PlaybackStop { source_ids: Vec<SourceId> },

    Transcript { user: String, assistant: String },

    TurnComplete { user: String, assistant: String },

    Error { code: String, message: String },

    Ping { timestamp: u64 },
}

impl ServerMessage {
    fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    fn from_live_error(err: &LiveError) -> Self {
        Self::error(err.code(), err.to_string())
    }
}

impl From<BridgeOutput> for ServerMessage {
    fn from(output: BridgeOutput) -> Self {
        match output {
            BridgeOutput::MicrophoneRequest => ServerMessage::MicrophoneRequest,
            BridgeOutput::Playback {
                source_id,
                start_at,
                duration,
                sample_rate,
                data,
            } => ServerMessage::Playback {
                source_id,
                start_at,
                duration,
                sample_rate,
                data,
            },
            BridgeOutput::PlaybackStop { source_ids } => ServerMessage::PlaybackStop { source_ids },
        }
    }
}

/// Browser-facing messages for one controller notice.
fn notice_messages(notice: SessionNotice) -> Vec<ServerMessage> {
    match notice {
        SessionNotice::Phase(status) => vec![ServerMessage::SessionStatus {
            status,
            message: phase_message(status).map(str::to_string),
        }],
        SessionNotice::Transcript(TranscriptState { user, assistant }) => {
            vec![ServerMessage::Transcript { user, assistant }]
        }
        SessionNotice::TurnComplete(TranscriptState { user, assistant }) => {
            vec![ServerMessage::TurnComplete { user, assistant }]
        }
        // the bridge already sent the matching playback_stop
        SessionNotice::Interrupted { .. } => Vec::new(),
        SessionNotice::Ended(Some(err)) => vec![ServerMessage::from_live_error(&err)],
        SessionNotice::Ended(None) => Vec::new(),
    }
}

fn phase_message(phase: SessionPhase) -> Option<&'static str> {
    match phase {
        SessionPhase::Starting => Some("Connecting live session"),
        SessionPhase::Active => Some("Live session connected"),
        SessionPhase::Stopping => None,
        SessionPhase::Idle => Some("Live session ended"),
    }
}

fn snapshot_text(context: Value) -> String {
    match context {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Outcome of a `start_session` request, reported back from the spawned task.
#[derive(Message)]
#[rtype(result = "()")]
struct StartOutcome(Result<String, LiveError>);

/// WebSocket actor hosting one live session.
///
/// ## Actor Model:
/// Three streams feed this actor: WebSocket frames from the browser, bridge output
/// from the proxy devices, and notices from the session controller. Slow work
/// (session start, speech synthesis) runs in spawned tasks that report back
/// through the actor's address.
pub struct LiveSocket {
    controller: SessionController,
    bridge: Arc<ClientBridge>,
    bridge_rx: Option<mpsc::UnboundedReceiver<BridgeOutput>>,
    app_state: web::Data<AppState>,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
    /// Whether this session is counted in `active_sessions`
    counted: bool,
}

impl LiveSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        let config = app_state.get_config();
        let (bridge, bridge_rx) = ClientBridge::new();
        let devices = Arc::new(ClientAudioDevices::new(bridge.clone(), &config));
        let connector = Arc::new(GeminiLiveConnector::from_config(&config));
        let controller = SessionController::new(devices, connector, LiveSettings::from_config(&config));

        Self {
            controller,
            bridge,
            bridge_rx: Some(bridge_rx),
            app_state,
            heartbeat_interval: config.live.heartbeat_interval(),
            client_timeout: config.live.client_timeout(),
            last_heartbeat: Instant::now(),
            counted: false,
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to serialize server message: {}", e),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!("Live socket error {}: {}", code, message);
        self.send(ctx, &ServerMessage::error(code, message));
    }

    fn handle_client_message(&mut self, message: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match message {
            ClientMessage::StartSession { context } => self.start_session(snapshot_text(context), ctx),
            ClientMessage::Microphone { granted } => {
                if !self.bridge.answer_permission(granted) {
                    warn!(granted, "Microphone answer received with no pending request");
                }
            }
            ClientMessage::StopSession => {
                let controller = self.controller.clone();
                actix_web::rt::spawn(async move { controller.stop().await });
            }
            ClientMessage::Narrate { text } => self.narrate(text, ctx),
            ClientMessage::Pong { timestamp } => {
                trace!(timestamp, "Heartbeat pong");
                self.last_heartbeat = Instant::now();
            }
        }
    }

    fn start_session(&mut self, context: String, ctx: &mut ws::WebsocketContext<Self>) {
        let phase = self.controller.phase();
        if phase != SessionPhase::Idle {
            let err = LiveError::SessionBusy(phase);
            self.send_error(ctx, err.code(), &err.to_string());
            return;
        }

        let controller = self.controller.clone();
        let addr = ctx.address();
        actix_web::rt::spawn(async move {
            let outcome = controller.start(&context).await;
            addr.do_send(StartOutcome(outcome));
        });
    }

    /// Synthesize `text` and schedule it after whatever is already queued.
    fn narrate(&mut self, text: String, ctx: &mut ws::WebsocketContext<Self>) {
        if self.controller.phase() != SessionPhase::Active {
            let err = LiveError::NotActive;
            self.send_error(ctx, err.code(), &err.to_string());
            return;
        }
        if text.trim().is_empty() {
            self.send_error(ctx, "invalid_narration", "Narration text must not be empty");
            return;
        }

        let controller = self.controller.clone();
        let state = self.app_state.clone();
        let addr = ctx.address();
        actix_web::rt::spawn(async move {
            let config = state.get_config();
            let Some(audio) = state.gemini.synthesize_speech(&config.gemini, &text).await else {
                addr.do_send(ServerMessage::error("speech_unavailable", "Speech model returned no audio"));
                return;
            };
            match controller.play_audio(&audio) {
                Ok(source) => debug!(
                    source_id = source.id,
                    start_at = source.start_at,
                    queued = controller.playback_status().active_sources,
                    "Narration scheduled"
                ),
                // the session may have ended while speech was being synthesized
                Err(e) => addr.do_send(ServerMessage::from_live_error(&e)),
            }
        });
    }

    fn handle_samples(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        if !self.bridge.microphone_open() {
            trace!(bytes = data.len(), "Ignoring samples with no open microphone");
            return;
        }
        match samples_from_f32_le(data) {
            Ok(samples) => {
                if !self.bridge.push_samples(samples) {
                    trace!("Microphone samples dropped");
                }
            }
            Err(e) => self.send_error(ctx, e.code(), &e.to_string()),
        }
    }

    fn track_phase(&mut self, phase: SessionPhase) {
        match phase {
            SessionPhase::Active if !self.counted => {
                self.counted = true;
                self.app_state.record_session_started();
            }
            SessionPhase::Idle if self.counted => {
                self.counted = false;
                self.app_state.record_session_ended();
                match self.controller.last_exit() {
                    Some(reason) => info!(reason = %reason, "Live session ended remotely"),
                    None => info!("Live session ended"),
                }
            }
            _ => {}
        }
    }
}

impl Actor for LiveSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Live socket connected");

        if let Some(rx) = self.bridge_rx.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
        ctx.add_stream(BroadcastStream::new(self.controller.subscribe()));

        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!("Live socket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            act.send(ctx, &ServerMessage::Ping { timestamp: unix_millis() });
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Live socket disconnected");

        let dropped = self.bridge.dropped_blocks();
        if dropped > 0 {
            warn!(dropped, "Microphone blocks were dropped during this connection");
        }

        // notices stop arriving once the actor is gone
        if self.counted {
            self.counted = false;
            self.app_state.record_session_ended();
        }

        let controller = self.controller.clone();
        actix_web::rt::spawn(async move { controller.stop().await });
    }
}

/// Frames from the browser.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LiveSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => self.handle_client_message(message, ctx),
                Err(err) => self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", err)),
            },
            Ok(ws::Message::Binary(data)) => self.handle_samples(&data, ctx),
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Live socket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// Output of the proxy devices.
impl StreamHandler<BridgeOutput> for LiveSocket {
    fn handle(&mut self, output: BridgeOutput, ctx: &mut Self::Context) {
        self.send(ctx, &ServerMessage::from(output));
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!("Bridge output stream finished");
    }
}

/// Controller notices.
impl StreamHandler<Result<SessionNotice, BroadcastStreamRecvError>> for LiveSocket {
    fn handle(&mut self, item: Result<SessionNotice, BroadcastStreamRecvError>, ctx: &mut Self::Context) {
        let notice = match item {
            Ok(notice) => notice,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "Live socket fell behind session notices");
                return;
            }
        };

        if let SessionNotice::Phase(phase) = notice {
            self.track_phase(phase);
        }
        for message in notice_messages(notice) {
            self.send(ctx, &message);
        }
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!("Session notice stream finished");
    }
}

impl Handler<ServerMessage> for LiveSocket {
    type Result = ();

    fn handle(&mut self, msg: ServerMessage, ctx: &mut Self::Context) {
        self.send(ctx, &msg);
    }
}

impl Handler<StartOutcome> for LiveSocket {
    type Result = ();

    fn handle(&mut self, msg: StartOutcome, ctx: &mut Self::Context) {
        match msg.0 {
            Ok(session_id) => info!(session_id = %session_id, "Live session started"),
            Err(LiveError::Cancelled) => info!("Live session start cancelled"),
            Err(err) => {
                if !matches!(err, LiveError::SessionBusy(_)) {
                    self.app_state.record_session_failed();
                }
                self.send_error(ctx, err.code(), &err.to_string());
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Each upgrade gets its own bridge, devices and controller, so sessions on
/// different sockets never share state.
pub async fn live_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New live socket request from: {:?}", req.connection_info().peer_addr());
    ws::start(LiveSocket::new(app_state), &req, stream)
}
