//! # PCM Frame Encoding
//!
//! Converts between the float samples the capture/playback side works with and the
//! base64 PCM16 payloads exchanged with the hosted live endpoint.
//!
//! ## Wire Format:
//! - **Outbound**: 16-bit signed little-endian PCM, base64 (standard alphabet, padded),
//!   tagged with MIME type `audio/pcm;rate=<rate>`
//! - **Inbound**: same encoding at the playback rate (24 kHz, mono)
//!
//! ## Scaling:
//! Encoding multiplies by 32768, truncates toward zero and then wraps modulo 2^16
//! without clamping, whatever the magnitude. A full-scale `1.0` therefore becomes `-32768`. Decoding divides by
//! 32768, so decoded samples always land in `[-1.0, 32767/32768]`.

use crate::error::LiveError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Microphone capture rate expected by the live endpoint.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Rate of the audio the live endpoint sends back.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

const PCM_SCALE: f32 = 32768.0;

/// One block of microphone samples as delivered by a capture context.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl CaptureFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Encode this frame for the wire.
    pub fn encode(&self) -> EncodedChunk {
        encode_samples(&self.samples, self.sample_rate)
    }
}

/// Base64 PCM16 payload plus its MIME tag, ready to ship as realtime input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedChunk {
    pub data: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl EncodedChunk {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Playable audio produced from an inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedBuffer {
    /// Duration in seconds (`samples / sample_rate`).
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// MIME tag for raw PCM16 at the given rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Scale a float sample to PCM16, wrapping out-of-range values modulo 2^16.
///
/// Any finite value wraps, however large. NaN and infinities encode as 0.
pub fn sample_to_i16(sample: f32) -> i16 {
    // the remainder of an integral float is exact; NaN casts to 0
    let wrapped = (sample * PCM_SCALE).trunc().rem_euclid(65536.0);
    wrapped as u32 as u16 as i16
}

/// Encode float samples as a base64 PCM16 chunk.
///
/// ## Parameters:
/// - **samples**: Mono float samples, nominally in [-1.0, 1.0]
/// - **sample_rate**: Rate recorded in the MIME tag
///
/// ## Returns:
/// An `EncodedChunk`. Empty input yields empty data with the same MIME tag.
pub fn encode_samples(samples: &[f32], sample_rate: u32) -> EncodedChunk {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }

    EncodedChunk {
        data: BASE64.encode(&bytes),
        mime_type: pcm_mime_type(sample_rate),
    }
}

/// Decode a base64 PCM16 payload into a playable buffer.
///
/// ## Errors:
/// `LiveError::DecodeFailure` when the payload is empty, not valid base64, or has an
/// odd number of bytes.
pub fn decode_base64_pcm(data: &str, sample_rate: u32) -> Result<DecodedBuffer, LiveError> {
    if data.is_empty() {
        return Err(LiveError::DecodeFailure("empty audio payload".to_string()));
    }

    let bytes = BASE64
        .decode(data)
        .map_err(|e| LiveError::DecodeFailure(format!("invalid base64: {}", e)))?;

    if bytes.len() % 2 != 0 {
        return Err(LiveError::DecodeFailure(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(&bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / PCM_SCALE);
    }

    Ok(DecodedBuffer { samples, sample_rate })
}

/// Parse a binary WebSocket frame of little-endian f32 samples from the browser.
pub fn samples_from_f32_le(bytes: &[u8]) -> Result<Vec<f32>, LiveError> {
    if bytes.len() % 4 != 0 {
        return Err(LiveError::DecodeFailure(format!(
            "float sample frame has length {} (not a multiple of 4)",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 4);
    while let Ok(sample) = cursor.read_f32::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}
