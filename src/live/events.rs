//! Messages exchanged with the live endpoint, independent of the wire format.

use crate::audio::pcm::EncodedChunk;
use serde::Serialize;
use tokio::sync::mpsc;

/// One demultiplexed event from the live endpoint.
///
/// A single server frame can carry several of these. Transports emit them in this
/// order: input transcript, output transcript, audio parts, interruption, turn end.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Base64 PCM16 audio at the playback rate
    AudioPayload(String),
    /// The user barged in; queued playback must stop
    Interrupted,
    /// Fragment of what the user said
    InputTranscriptDelta(String),
    /// Fragment of what the assistant said
    OutputTranscriptDelta(String),
    TurnComplete,
    /// The remote side closed the connection
    Closed,
    /// Transport or protocol failure
    Error(String),
}

impl InboundEvent {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::AudioPayload(_) => "audio",
            InboundEvent::Interrupted => "interrupted",
            InboundEvent::InputTranscriptDelta(_) => "input_transcript",
            InboundEvent::OutputTranscriptDelta(_) => "output_transcript",
            InboundEvent::TurnComplete => "turn_complete",
            InboundEvent::Closed => "closed",
            InboundEvent::Error(_) => "error",
        }
    }
}

/// Realtime input sent to the live endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub media: EncodedChunk,
}

/// Where a transport delivers inbound events.
pub type EventSender = mpsc::UnboundedSender<InboundEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<InboundEvent>;
