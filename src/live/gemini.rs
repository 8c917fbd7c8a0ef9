//! # Gemini Live Transport
//!
//! `LiveConnector` implementation for the hosted bidirectional audio endpoint.
//!
//! ## Connection Flow:
//! 1. Open `wss://…BidiGenerateContent?key=<api key>`
//! 2. Send a `setup` message (model, audio response modality, voice, system
//!    instruction, input and output transcription)
//! 3. Wait for `setupComplete` within the connect timeout
//! 4. Split the socket: a writer task drains an outbound queue, a reader task
//!    demultiplexes server frames into `InboundEvent`s
//!
//! ## Outbound Frame:
//! ```json
//! {"realtimeInput": {"mediaChunks": [{"data": "<base64 pcm16>", "mimeType": "audio/pcm;rate=16000"}]}}
//! ```
//!
//! ## Inbound Frames:
//! Server frames arrive as text or binary JSON. A single `serverContent` message may
//! carry transcripts, several audio parts, an interruption flag and a turn end; they
//! are emitted in that order.

use crate::audio::pcm::EncodedChunk;
use crate::config::AppConfig;
use crate::error::LiveError;
use crate::live::events::{EventSender, InboundEvent, OutboundMessage};
use crate::live::transport::{LiveConnector, LiveTransport};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Opens live connections using the `gemini` and `live` config sections.
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    url: String,
    api_key: String,
    model: String,
    voice: String,
    connect_timeout: Duration,
}

impl GeminiLiveConnector {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            url: config.gemini.live_url.clone(),
            api_key: config.gemini.api_key.clone(),
            model: config.gemini.live_model.clone(),
            voice: config.gemini.live_voice.clone(),
            connect_timeout: config.live.connect_timeout(),
        }
    }

    fn setup_message(&self, directive: &str) -> serde_json::Value {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        json!({
            "setup": {
                "model": model,
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": self.voice }
                        }
                    }
                },
                "systemInstruction": { "parts": [{ "text": directive }] },
                "inputAudioTranscription": {},
                "outputAudioTranscription": {}
            }
        })
    }

    async fn open(&self, directive: &str) -> Result<WsStream, LiveError> {
        let url = format!("{}?key={}", self.url, self.api_key);
        let (mut ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        ws.send(Message::Text(self.setup_message(directive).to_string()))
            .await
            .map_err(|e| LiveError::ConnectionFailed(format!("failed to send setup: {}", e)))?;

        while let Some(frame) = ws.next().await {
            let frame = frame.map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;
            let message = match parse_frame(&frame) {
                FrameContent::Message(message) => message,
                FrameContent::Closed(reason) => {
                    return Err(LiveError::ConnectionFailed(format!("closed during setup: {}", reason)))
                }
                FrameContent::Skip => continue,
            };
            if message.setup_complete.is_some() {
                return Ok(ws);
            }
        }
        Err(LiveError::ConnectionFailed("connection ended before setup completed".to_string()))
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(
        &self,
        directive: &str,
        events: EventSender,
    ) -> Result<Box<dyn LiveTransport>, LiveError> {
        if self.api_key.trim().is_empty() {
            return Err(LiveError::ConnectionFailed("no API key configured".to_string()));
        }

        let ws = timeout(self.connect_timeout, self.open(directive))
            .await
            .map_err(|_| LiveError::ConnectionFailed("timed out waiting for setup".to_string()))??;
        info!(model = %self.model, voice = %self.voice, "Live connection established");

        let (sink, stream) = ws.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(sink, outbound_rx));
        let reader = tokio::spawn(read_loop(stream, events));

        Ok(Box::new(GeminiLiveTransport {
            outbound: Some(outbound),
            writer: Some(writer),
            reader: Some(reader),
        }))
    }
}

/// Open connection to the live endpoint.
pub struct GeminiLiveTransport {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl LiveTransport for GeminiLiveTransport {
    fn send_audio(&self, chunk: EncodedChunk) -> Result<(), LiveError> {
        let outbound = self.outbound.as_ref().ok_or(LiveError::RemoteClosed)?;
        let frame = realtime_input_frame(&OutboundMessage { media: chunk });
        outbound
            .send(Message::Text(frame))
            .map_err(|_| LiveError::RemoteClosed)
    }

    async fn close(&mut self) {
        // stop reading first so no Closed event follows a local close
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Message::Close(None));
        }
        if let Some(writer) = self.writer.take() {
            if timeout(CLOSE_GRACE, writer).await.is_err() {
                warn!("Live connection writer did not finish closing in time");
            }
        }
        debug!("Live connection closed");
    }

    fn is_closed(&self) -> bool {
        self.outbound.is_none()
    }
}

impl Drop for GeminiLiveTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

/// Wrap an outbound message in the realtime input envelope.
pub fn realtime_input_frame(message: &OutboundMessage) -> String {
    json!({ "realtimeInput": { "mediaChunks": [&message.media] } }).to_string()
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut outbound: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!("Live connection write failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(mut stream: SplitStream<WsStream>, events: EventSender) {
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                let _ = events.send(InboundEvent::Error(e.to_string()));
                return;
            }
        };

        match parse_frame(&frame) {
            FrameContent::Message(message) => {
                for event in demultiplex(message) {
                    if events.send(event).is_err() {
                        return;
                    }
                }
            }
            FrameContent::Closed(reason) => {
                debug!("Live endpoint sent close: {}", reason);
                let _ = events.send(InboundEvent::Closed);
                return;
            }
            FrameContent::Skip => {}
        }
    }
    let _ = events.send(InboundEvent::Closed);
}

enum FrameContent {
    Message(ServerMessage),
    Closed(String),
    Skip,
}

fn parse_frame(frame: &Message) -> FrameContent {
    let parsed = match frame {
        Message::Text(text) => serde_json::from_str::<ServerMessage>(text),
        Message::Binary(bytes) => serde_json::from_slice::<ServerMessage>(bytes),
        Message::Close(close) => {
            let reason = close
                .as_ref()
                .map(|c| format!("{} {}", c.code, c.reason))
                .unwrap_or_else(|| "no reason".to_string());
            return FrameContent::Closed(reason);
        }
        _ => return FrameContent::Skip,
    };

    match parsed {
        Ok(message) => FrameContent::Message(message),
        Err(e) => {
            warn!("Skipping unparsable live frame: {}", e);
            FrameContent::Skip
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    text: Option<String>,
}

/// Split one server message into events, in processing order.
fn demultiplex(message: ServerMessage) -> Vec<InboundEvent> {
    let mut events = Vec::new();

    if message.go_away.is_some() {
        debug!("Live endpoint announced it will disconnect soon");
    }

    let Some(content) = message.server_content else {
        return events;
    };

    if let Some(text) = content.input_transcription.and_then(|t| t.text) {
        if !text.is_empty() {
            events.push(InboundEvent::InputTranscriptDelta(text));
        }
    }
    if let Some(text) = content.output_transcription.and_then(|t| t.text) {
        if !text.is_empty() {
            events.push(InboundEvent::OutputTranscriptDelta(text));
        }
    }
    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(inline) = part.inline_data {
                events.push(InboundEvent::AudioPayload(inline.data));
            }
        }
    }
    if content.interrupted {
        events.push(InboundEvent::Interrupted);
    }
    if content.turn_complete {
        events.push(InboundEvent::TurnComplete);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ServerMessage {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_demultiplex_order() {
        let message = parse(
            r#"{"serverContent": {
                "turnComplete": true,
                "interrupted": true,
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}}, {"text": "ignored"}, {"inlineData": {"data": "BBB="}}]},
                "outputTranscription": {"text": "High risk"},
                "inputTranscription": {"text": "Is it safe"}
            }}"#,
        );

        assert_eq!(
            demultiplex(message),
            vec![
                InboundEvent::InputTranscriptDelta("Is it safe".into()),
                InboundEvent::OutputTranscriptDelta("High risk".into()),
                InboundEvent::AudioPayload("AAA=".into()),
                InboundEvent::AudioPayload("BBB=".into()),
                InboundEvent::Interrupted,
                InboundEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_setup_complete_carries_no_events() {
        let message = parse(r#"{"setupComplete": {}}"#);
        assert!(message.setup_complete.is_some());
        assert!(demultiplex(message).is_empty());
    }

    #[test]
    fn test_binary_frames_are_json_too() {
        let frame = Message::Binary(br#"{"serverContent": {"turnComplete": true}}"#.to_vec());
        match parse_frame(&frame) {
            FrameContent::Message(message) => assert_eq!(demultiplex(message), vec![InboundEvent::TurnComplete]),
            _ => panic!("expected a message"),
        }
        assert!(matches!(parse_frame(&Message::Text("nope".into())), FrameContent::Skip));
        assert!(matches!(parse_frame(&Message::Close(None)), FrameContent::Closed(_)));
    }

    #[test]
    fn test_realtime_input_frame() {
        let frame = realtime_input_frame(&OutboundMessage {
            media: EncodedChunk {
                data: "AAAA".into(),
                mime_type: "audio/pcm;rate=16000".into(),
            },
        });
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["realtimeInput"]["mediaChunks"][0]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(value["realtimeInput"]["mediaChunks"][0]["data"], "AAAA");
    }

    #[test]
    fn test_setup_message_shape() {
        let connector = GeminiLiveConnector::from_config(&AppConfig::default());
        let setup = connector.setup_message("be brief");

        assert_eq!(setup["setup"]["model"], "models/gemini-2.5-flash-native-audio-preview-09-2025");
        assert_eq!(setup["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(setup["setup"]["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(setup["setup"]["inputAudioTranscription"].is_object());
    }

    #[tokio::test]
    async fn test_missing_key_fails_fast() {
        let connector = GeminiLiveConnector::from_config(&AppConfig::default());
        let (events, _rx) = mpsc::unbounded_channel();
        let result = connector.connect("directive", events).await;
        assert!(matches!(result, Err(LiveError::ConnectionFailed(_))));
    }
}
