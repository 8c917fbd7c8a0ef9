//! # Browser Device Bridge
//!
//! The browser owns the real microphone and speakers, so the server-side audio
//! devices are proxies over the `/ws/live` socket:
//!
//! - **Microphone**: a permission request goes out as a `BridgeOutput`, the socket
//!   feeds back the answer and then binary sample blocks.
//! - **Capture context**: framing only (`FramingCaptureContext`).
//! - **Playback context**: a monotonic clock that starts when the context opens.
//!   Scheduled buffers and stop orders are forwarded to the browser, which anchors
//!   `start_at` to its own output clock.
//!
//! ## Rust Concepts:
//! - **oneshot channel**: Carries the single permission answer back to the waiting
//!   `request_microphone` call.
//! - **bounded mpsc**: Microphone blocks use `try_send`; when the session falls behind,
//!   blocks are dropped instead of buffering without limit.

use crate::audio::capture::{CaptureContext, FramingCaptureContext};
use crate::audio::pcm::{encode_samples, DecodedBuffer};
use crate::audio::playback::{PlaybackContext, SourceId};
use crate::config::AppConfig;
use crate::error::LiveError;
use crate::live::devices::{AudioDevices, MicrophoneStream};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

const MICROPHONE_QUEUE: usize = 64;

/// What the bridge needs the socket to send to the browser.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeOutput {
    MicrophoneRequest,
    Playback {
        source_id: SourceId,
        start_at: f64,
        duration: f64,
        sample_rate: u32,
        data: String,
    },
    PlaybackStop {
        source_ids: Vec<SourceId>,
    },
}

/// Shared state between the socket actor and the proxy devices.
pub struct ClientBridge {
    outbound: mpsc::UnboundedSender<BridgeOutput>,
    permission: Mutex<Option<oneshot::Sender<bool>>>,
    microphone: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
    dropped_blocks: AtomicU64,
}

impl ClientBridge {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<BridgeOutput>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(Self {
            outbound,
            permission: Mutex::new(None),
            microphone: Mutex::new(None),
            dropped_blocks: AtomicU64::new(0),
        });
        (bridge, rx)
    }

    /// Deliver the browser's answer to a pending microphone request.
    ///
    /// ## Returns:
    /// `false` if no request was waiting.
    pub fn answer_permission(&self, granted: bool) -> bool {
        match self.lock(&self.permission).take() {
            Some(waiter) => waiter.send(granted).is_ok(),
            None => false,
        }
    }

    /// Feed microphone samples from the browser.
    ///
    /// ## Returns:
    /// `false` if no microphone is open or the block was dropped.
    pub fn push_samples(&self, samples: Vec<f32>) -> bool {
        let microphone = self.lock(&self.microphone);
        let Some(sender) = microphone.as_ref() else {
            return false;
        };
        match sender.try_send(samples) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_blocks.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 100 == 1 {
                    warn!(dropped, "Microphone queue full, dropping blocks");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn microphone_open(&self) -> bool {
        self.lock(&self.microphone).is_some()
    }

    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks.load(Ordering::Relaxed)
    }

    fn send(&self, output: BridgeOutput) {
        if self.outbound.send(output).is_err() {
            debug!("Client socket is gone, dropping bridge output");
        }
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `AudioDevices` backed by a connected browser.
pub struct ClientAudioDevices {
    bridge: Arc<ClientBridge>,
    permission_timeout: Duration,
    frame_size: usize,
}

impl ClientAudioDevices {
    pub fn new(bridge: Arc<ClientBridge>, config: &AppConfig) -> Self {
        Self {
            bridge,
            permission_timeout: config.live.permission_timeout(),
            frame_size: config.audio.capture_frame_size,
        }
    }
}

#[async_trait]
impl AudioDevices for ClientAudioDevices {
    async fn request_microphone(&self) -> Result<Box<dyn MicrophoneStream>, LiveError> {
        let (waiter, answer) = oneshot::channel();
        *self.bridge.lock(&self.bridge.permission) = Some(waiter);
        self.bridge.send(BridgeOutput::MicrophoneRequest);

        match timeout(self.permission_timeout, answer).await {
            Ok(Ok(true)) => {
                let (tx, rx) = mpsc::channel(MICROPHONE_QUEUE);
                *self.bridge.lock(&self.bridge.microphone) = Some(tx);
                Ok(Box::new(ClientMicrophone {
                    bridge: self.bridge.clone(),
                    blocks: Some(rx),
                    released: false,
                }))
            }
            Ok(Ok(false)) => Err(LiveError::PermissionDenied("the client refused microphone access".to_string())),
            Ok(Err(_)) => Err(LiveError::PermissionDenied("the permission request was abandoned".to_string())),
            Err(_) => {
                self.bridge.lock(&self.bridge.permission).take();
                Err(LiveError::PermissionDenied(format!(
                    "no answer within {}s",
                    self.permission_timeout.as_secs()
                )))
            }
        }
    }

    async fn open_capture_context(&self, sample_rate: u32) -> Result<Box<dyn CaptureContext>, LiveError> {
        Ok(Box::new(FramingCaptureContext::new(sample_rate, self.frame_size)))
    }

    async fn open_playback_context(&self, sample_rate: u32) -> Result<Box<dyn PlaybackContext>, LiveError> {
        Ok(Box::new(ClientPlaybackContext {
            bridge: self.bridge.clone(),
            sample_rate,
            opened_at: Instant::now(),
            closed: false,
        }))
    }
}

struct ClientMicrophone {
    bridge: Arc<ClientBridge>,
    blocks: Option<mpsc::Receiver<Vec<f32>>>,
    released: bool,
}

impl MicrophoneStream for ClientMicrophone {
    fn take_blocks(&mut self) -> Option<mpsc::Receiver<Vec<f32>>> {
        self.blocks.take()
    }

    fn release(&mut self) {
        if !self.released {
            // dropping the sender ends the block stream
            self.bridge.lock(&self.bridge.microphone).take();
            self.released = true;
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

struct ClientPlaybackContext {
    bridge: Arc<ClientBridge>,
    sample_rate: u32,
    opened_at: Instant,
    closed: bool,
}

impl PlaybackContext for ClientPlaybackContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.opened_at.elapsed().as_secs_f64()
    }

    fn start_source(&mut self, id: SourceId, buffer: &DecodedBuffer, start_at: f64) {
        if self.closed {
            return;
        }
        self.bridge.send(BridgeOutput::Playback {
            source_id: id,
            start_at,
            duration: buffer.duration(),
            sample_rate: buffer.sample_rate,
            data: encode_samples(&buffer.samples, buffer.sample_rate).data,
        });
    }

    fn stop_source(&mut self, id: SourceId) {
        if self.closed {
            return;
        }
        self.bridge.send(BridgeOutput::PlaybackStop { source_ids: vec![id] });
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::decode_base64_pcm;

    fn devices(bridge: &Arc<ClientBridge>) -> ClientAudioDevices {
        let mut config = AppConfig::default();
        config.live.permission_timeout_secs = 1;
        ClientAudioDevices::new(bridge.clone(), &config)
    }

    #[tokio::test]
    async fn test_granted_microphone_streams_blocks() {
        let (bridge, mut outputs) = ClientBridge::new();
        let devices = devices(&bridge);

        let request = tokio::spawn(async move { devices.request_microphone().await });
        assert_eq!(outputs.recv().await, Some(BridgeOutput::MicrophoneRequest));
        assert!(bridge.answer_permission(true));

        let mut microphone = request.await.unwrap().unwrap();
        let mut blocks = microphone.take_blocks().unwrap();
        assert!(microphone.take_blocks().is_none());

        assert!(bridge.push_samples(vec![0.1, 0.2]));
        assert_eq!(blocks.recv().await, Some(vec![0.1, 0.2]));

        microphone.release();
        assert!(!bridge.microphone_open());
        assert_eq!(blocks.recv().await, None);
    }

    #[tokio::test]
    async fn test_refused_microphone() {
        let (bridge, mut outputs) = ClientBridge::new();
        let devices = devices(&bridge);

        let request = tokio::spawn(async move { devices.request_microphone().await });
        outputs.recv().await;
        bridge.answer_permission(false);

        assert!(matches!(request.await.unwrap(), Err(LiveError::PermissionDenied(_))));
        assert!(!bridge.push_samples(vec![0.0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out() {
        let (bridge, _outputs) = ClientBridge::new();
        let devices = devices(&bridge);

        let result = devices.request_microphone().await;
        assert!(matches!(result, Err(LiveError::PermissionDenied(_))));
        assert!(!bridge.answer_permission(true));
    }

    #[tokio::test]
    async fn test_playback_forwards_to_client() {
        let (bridge, mut outputs) = ClientBridge::new();
        let mut playback = devices(&bridge).open_playback_context(24_000).await.unwrap();

        let buffer = DecodedBuffer { samples: vec![0.5; 240], sample_rate: 24_000 };
        playback.start_source(7, &buffer, 1.5);
        playback.stop_source(7);
        playback.close();
        playback.stop_source(8);

        match outputs.recv().await {
            Some(BridgeOutput::Playback { source_id, start_at, duration, data, .. }) => {
                assert_eq!(source_id, 7);
                assert_eq!(start_at, 1.5);
                assert!((duration - 0.01).abs() < 1e-9);
                assert_eq!(decode_base64_pcm(&data, 24_000).unwrap().samples, buffer.samples);
            }
            other => panic!("unexpected output: {:?}", other),
        }
        assert_eq!(outputs.recv().await, Some(BridgeOutput::PlaybackStop { source_ids: vec![7] }));
        assert!(outputs.try_recv().is_err());
    }
}
