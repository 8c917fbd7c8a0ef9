//! # Audio Module
//!
//! Everything that touches raw samples on the way to or from the live endpoint.
//!
//! ## Key Components:
//! - **PCM**: Float <-> base64 PCM16 conversion (`pcm`)
//! - **Capture**: Microphone re-framing into fixed-size capture frames (`capture`)
//! - **Playback**: Gapless scheduling of inbound buffers with interruption (`playback`)
//!
//! ## Audio Format:
//! - **Capture**: 16 kHz mono, 4096-sample frames, 16-bit PCM on the wire
//! - **Playback**: 24 kHz mono, 16-bit PCM from the wire
//! - **Encoding**: Little-endian signed integers, base64

pub mod capture;   // Capture contexts and framing
pub mod pcm;       // PCM16 encode/decode
pub mod playback;  // Playback scheduler and context trait
