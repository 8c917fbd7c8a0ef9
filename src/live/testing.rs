//! In-memory devices and transport for exercising the session controller.

use crate::audio::capture::{CaptureContext, FramingCaptureContext, DEFAULT_FRAME_SIZE};
use crate::audio::pcm::{CaptureFrame, DecodedBuffer, EncodedChunk};
use crate::audio::playback::{PlaybackContext, SourceId};
use crate::error::LiveError;
use crate::live::devices::{AudioDevices, MicrophoneStream};
use crate::live::events::{EventSender, InboundEvent};
use crate::live::transport::{LiveConnector, LiveTransport};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

/// Base64 of `samples` silent PCM16 samples.
pub fn pcm_base64(samples: usize) -> String {
    BASE64.encode(vec![0u8; samples * 2])
}

/// Counts every resource opened and released.
#[derive(Debug, Default)]
pub struct ResourceLog {
    microphones_opened: AtomicUsize,
    microphones_released: AtomicUsize,
    captures_opened: AtomicUsize,
    captures_closed: AtomicUsize,
    playbacks_opened: AtomicUsize,
    playbacks_closed: AtomicUsize,
    transports_opened: AtomicUsize,
    transports_closed: AtomicUsize,
}

impl ResourceLog {
    pub fn opened(&self) -> usize {
        self.microphones_opened.load(Ordering::SeqCst)
            + self.captures_opened.load(Ordering::SeqCst)
            + self.playbacks_opened.load(Ordering::SeqCst)
            + self.transports_opened.load(Ordering::SeqCst)
    }

    /// Every opened resource was released exactly once.
    pub fn all_released(&self) -> bool {
        let pairs = [
            (&self.microphones_opened, &self.microphones_released),
            (&self.captures_opened, &self.captures_closed),
            (&self.playbacks_opened, &self.playbacks_closed),
            (&self.transports_opened, &self.transports_closed),
        ];
        pairs
            .iter()
            .all(|(opened, closed)| opened.load(Ordering::SeqCst) == closed.load(Ordering::SeqCst))
    }

    pub fn microphones_released(&self) -> usize {
        self.microphones_released.load(Ordering::SeqCst)
    }

    pub fn transports_closed(&self) -> usize {
        self.transports_closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCall {
    Start { id: SourceId, start_at: f64, duration: f64 },
    Stop(SourceId),
}

pub struct FakeDevices {
    log: Arc<ResourceLog>,
    deny_microphone: bool,
    mic_sender: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
    clock: Arc<Mutex<f64>>,
    calls: Arc<Mutex<Vec<PlaybackCall>>>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self {
            log: Arc::new(ResourceLog::default()),
            deny_microphone: false,
            mic_sender: Mutex::new(None),
            clock: Arc::new(Mutex::new(0.0)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn denying_microphone(mut self) -> Self {
        self.deny_microphone = true;
        self
    }


    pub fn log(&self) -> Arc<ResourceLog> {
        self.log.clone()
    }

    pub fn set_clock(&self, now: f64) {
        *self.clock.lock().unwrap() = now;
    }

    pub fn playback_calls(&self) -> Vec<PlaybackCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Sender feeding the most recently granted microphone.
    pub fn mic_sender(&self) -> Option<mpsc::Sender<Vec<f32>>> {
        self.mic_sender.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioDevices for FakeDevices {
    async fn request_microphone(&self) -> Result<Box<dyn MicrophoneStream>, LiveError> {
        if self.deny_microphone {
            return Err(LiveError::PermissionDenied("denied by test".to_string()));
        }

        let (tx, rx) = mpsc::channel(16);
        *self.mic_sender.lock().unwrap() = Some(tx);
        self.log.microphones_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeMicrophone {
            log: self.log.clone(),
            blocks: Some(rx),
            released: false,
        }))
    }

    async fn open_capture_context(&self, sample_rate: u32) -> Result<Box<dyn CaptureContext>, LiveError> {
        self.log.captures_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCapture {
            log: self.log.clone(),
            inner: FramingCaptureContext::new(sample_rate, DEFAULT_FRAME_SIZE),
        }))
    }

    async fn open_playback_context(&self, sample_rate: u32) -> Result<Box<dyn PlaybackContext>, LiveError> {
        self.log.playbacks_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePlayback {
            log: self.log.clone(),
            sample_rate,
            clock: self.clock.clone(),
            calls: self.calls.clone(),
            closed: false,
        }))
    }
}

struct FakeMicrophone {
    log: Arc<ResourceLog>,
    blocks: Option<mpsc::Receiver<Vec<f32>>>,
    released: bool,
}

impl MicrophoneStream for FakeMicrophone {
    fn take_blocks(&mut self) -> Option<mpsc::Receiver<Vec<f32>>> {
        self.blocks.take()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.log.microphones_released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

struct FakeCapture {
    log: Arc<ResourceLog>,
    inner: FramingCaptureContext,
}

impl CaptureContext for FakeCapture {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn process(&mut self, samples: &[f32]) -> Vec<CaptureFrame> {
        self.inner.process(samples)
    }

    fn close(&mut self) {
        if !self.inner.is_closed() {
            self.inner.close();
            self.log.captures_closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

struct FakePlayback {
    log: Arc<ResourceLog>,
    sample_rate: u32,
    clock: Arc<Mutex<f64>>,
    calls: Arc<Mutex<Vec<PlaybackCall>>>,
    closed: bool,
}

impl PlaybackContext for FakePlayback {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        *self.clock.lock().unwrap()
    }

    fn start_source(&mut self, id: SourceId, buffer: &DecodedBuffer, start_at: f64) {
        self.calls.lock().unwrap().push(PlaybackCall::Start {
            id,
            start_at,
            duration: buffer.duration(),
        });
    }

    fn stop_source(&mut self, id: SourceId) {
        self.calls.lock().unwrap().push(PlaybackCall::Stop(id));
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.playbacks_closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

pub struct FakeConnector {
    log: Arc<ResourceLog>,
    fail: bool,
    gate: Option<Arc<Notify>>,
    sent: Arc<Mutex<Vec<EncodedChunk>>>,
    events: Mutex<Option<EventSender>>,
    directives: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(log: Arc<ResourceLog>) -> Self {
        Self {
            log,
            fail: false,
            gate: None,
            sent: Arc::new(Mutex::new(Vec::new())),
            events: Mutex::new(None),
            directives: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Hold `connect` until the gate is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn sent(&self) -> Vec<EncodedChunk> {
        self.sent.lock().unwrap().clone()
    }

    pub fn directives(&self) -> Vec<String> {
        self.directives.lock().unwrap().clone()
    }

    /// Deliver an inbound event as if the remote side sent it.
    pub fn emit(&self, event: InboundEvent) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, directive: &str, events: EventSender) -> Result<Box<dyn LiveTransport>, LiveError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(LiveError::ConnectionFailed("refused by test".to_string()));
        }
        self.log.transports_opened.fetch_add(1, Ordering::SeqCst);
        self.directives.lock().unwrap().push(directive.to_string());
        *self.events.lock().unwrap() = Some(events);
        Ok(Box::new(FakeTransport {
            log: self.log.clone(),
            sent: self.sent.clone(),
            closed: false,
        }))
    }
}

struct FakeTransport {
    log: Arc<ResourceLog>,
    sent: Arc<Mutex<Vec<EncodedChunk>>>,
    closed: bool,
}

#[async_trait]
impl LiveTransport for FakeTransport {
    fn send_audio(&self, chunk: EncodedChunk) -> Result<(), LiveError> {
        if self.closed {
            return Err(LiveError::RemoteClosed);
        }
        self.sent.lock().unwrap().push(chunk);
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.transports_closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
