//! # Live Voice Sessions
//!
//! Real-time, bidirectional voice conversation with the hosted model: microphone audio
//! goes up as PCM16 chunks, synthesized speech and transcripts come back.
//!
//! ## Key Components:
//! - **controller**: Session lifecycle state machine and the single event pump
//! - **handle**: The four session resources, acquired and released together
//! - **transport** / **gemini**: Connection seam and the hosted endpoint implementation
//! - **devices** / **client**: Audio device seam and the browser-backed implementation
//! - **transcript**: Per-turn transcript accumulation
//! - **directive**: System instruction built from the caller's scan data
//!
//! ## Data Flow:
//! ```text
//! browser mic ─▶ ClientBridge ─▶ capture framing ─▶ PCM16 encode ─▶ transport
//! transport ─▶ InboundEvent ─▶ decode ─▶ PlaybackScheduler ─▶ ClientBridge ─▶ browser
//!                         └──▶ TranscriptAggregator ─▶ SessionNotice
//! ```

pub mod client;      // Browser-backed audio devices
pub mod controller;  // Session state machine
pub mod devices;     // Audio device traits
pub mod directive;   // System instruction
pub mod events;      // Inbound/outbound event types
pub mod gemini;      // Hosted live endpoint transport
pub mod handle;      // Session resource ownership
pub mod transcript;  // Turn transcript accumulation
pub mod transport;   // Transport traits

#[cfg(test)]
pub mod testing;

pub use controller::{LiveSettings, SessionController, SessionNotice, SessionPhase};
