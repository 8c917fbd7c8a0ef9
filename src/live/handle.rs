//! # Session Resources
//!
//! A live session holds four resources: the streaming connection, the capture context,
//! the playback context and the microphone stream. They are acquired one at a time
//! into `PendingResources` and only become a `SessionHandle` once all four exist.
//! Both types release everything they hold in one routine.
//!
//! ## Release Order:
//! 1. Streaming connection (no more inbound events)
//! 2. Capture context
//! 3. Playback context
//! 4. Microphone stream
//!
//! ## Rust Concepts:
//! - **Consuming methods**: `release(self)` takes ownership, so a released handle
//!   cannot be used or released again; double release is a compile error.
//! - **Drop**: If a handle is dropped without `release`, the synchronous parts are
//!   still released and the skipped connection close is logged.

use crate::audio::capture::CaptureContext;
use crate::audio::pcm::EncodedChunk;
use crate::audio::playback::PlaybackContext;
use crate::error::LiveError;
use crate::live::devices::MicrophoneStream;
use crate::live::transport::LiveTransport;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The four resources of a running session, owned together.
pub struct SessionHandle {
    session_id: String,
    transport: Box<dyn LiveTransport>,
    capture: Box<dyn CaptureContext>,
    playback: Box<dyn PlaybackContext>,
    microphone: Box<dyn MicrophoneStream>,
    released: bool,
}

impl SessionHandle {
    pub fn playback_mut(&mut self) -> &mut dyn PlaybackContext {
        self.playback.as_mut()
    }

    /// Take the microphone's block stream. Returns `None` after the first call.
    pub fn take_microphone_blocks(&mut self) -> Option<mpsc::Receiver<Vec<f32>>> {
        self.microphone.take_blocks()
    }

    /// Run samples through the capture context and send every completed frame.
    ///
    /// ## Returns:
    /// Number of chunks handed to the transport. Send failures are logged, not returned.
    pub fn forward_capture(&mut self, samples: &[f32]) -> usize {
        let chunks: Vec<EncodedChunk> = self
            .capture
            .process(samples)
            .iter()
            .map(|frame| frame.encode())
            .collect();

        let mut sent = 0;
        for chunk in chunks {
            match self.transport.send_audio(chunk) {
                Ok(()) => sent += 1,
                Err(e) => debug!(session_id = %self.session_id, "Dropping capture frame: {}", e),
            }
        }
        sent
    }

    /// Release all four resources.
    pub async fn release(mut self) {
        self.transport.close().await;
        self.release_sync();
        self.released = true;
        debug!(session_id = %self.session_id, "Session resources released");
    }

    fn release_sync(&mut self) {
        if !self.capture.is_closed() {
            self.capture.close();
        }
        if !self.playback.is_closed() {
            self.playback.close();
        }
        if !self.microphone.is_released() {
            self.microphone.release();
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if !self.transport.is_closed() {
            warn!(
                session_id = %self.session_id,
                "Session handle dropped without release; connection close skipped"
            );
        }
        self.release_sync();
    }
}

/// Resources acquired so far by an in-flight `start()`.
#[derive(Default)]
pub struct PendingResources {
    pub microphone: Option<Box<dyn MicrophoneStream>>,
    pub capture: Option<Box<dyn CaptureContext>>,
    pub playback: Option<Box<dyn PlaybackContext>>,
    pub transport: Option<Box<dyn LiveTransport>>,
}

impl PendingResources {
    /// Turn a complete set into a `SessionHandle`.
    ///
    /// ## Returns:
    /// - **Ok(handle)**: All four resources were present
    /// - **Err(self)**: Something is missing; the caller still owns everything acquired
    pub fn into_handle(self, session_id: String) -> Result<SessionHandle, PendingResources> {
        match self {
            PendingResources {
                microphone: Some(microphone),
                capture: Some(capture),
                playback: Some(playback),
                transport: Some(transport),
            } => Ok(SessionHandle {
                session_id,
                transport,
                capture,
                playback,
                microphone,
                released: false,
            }),
            incomplete => Err(incomplete),
        }
    }

    /// Release whatever was acquired, in the same order as a full handle.
    ///
    /// ## Returns:
    /// Number of resources released.
    pub async fn release(self) -> usize {
        let mut released = 0;
        if let Some(mut transport) = self.transport {
            transport.close().await;
            released += 1;
        }
        if let Some(mut capture) = self.capture {
            capture.close();
            released += 1;
        }
        if let Some(mut playback) = self.playback {
            playback.close();
            released += 1;
        }
        if let Some(mut microphone) = self.microphone {
            microphone.release();
            released += 1;
        }
        released
    }

    pub fn missing(&self) -> Option<LiveError> {
        let name = if self.microphone.is_none() {
            "microphone"
        } else if self.capture.is_none() {
            "capture context"
        } else if self.playback.is_none() {
            "playback context"
        } else if self.transport.is_none() {
            "live connection"
        } else {
            return None;
        };
        Some(LiveError::DeviceUnavailable(format!("{} was not acquired", name)))
    }
}
