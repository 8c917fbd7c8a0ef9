//! # Live Session Controller
//!
//! Owns the lifecycle of one bidirectional voice session:
//!
//! ```text
//! Idle ──start()──▶ Starting ──all resources acquired──▶ Active
//!   ▲                  │                                   │
//!   │      failure / stop() mid-start              stop() / remote close / remote error
//!   │                  ▼                                   ▼
//!   └──────────────── Idle ◀───────── teardown ────────── Stopping
//! ```
//!
//! ## Concurrency Model:
//! - All mutable session state (handle, playback scheduler, transcript) sits in one
//!   `std::sync::Mutex<Core>`. The lock is never held across an `.await`.
//! - Once `Active`, a single pump task processes microphone blocks, inbound events and
//!   a playback reap tick. Inbound events are handled strictly in arrival order.
//! - Every exit path (explicit stop, remote close, remote error) takes the handle out
//!   of `Core` while holding the lock and then releases it. Only one path can take it,
//!   so resources are released exactly once.
//! - `stop()` during `Starting` only raises a flag. The in-flight `start()` notices it
//!   after its current step, releases everything acquired so far and returns
//!   `Cancelled`; `stop()` waits for `Idle` before returning.
//!
//! ## Rust Concepts:
//! - **Arc<Inner>**: The controller is cheap to clone; the pump task holds a clone.
//! - **watch channel**: Current phase, so `stop()` can wait for `Idle`.
//! - **broadcast channel**: Session notices for the presentation layer.

use crate::audio::pcm::decode_base64_pcm;
use crate::audio::playback::{PlaybackScheduler, PlaybackSource};
use crate::config::AppConfig;
use crate::error::LiveError;
use crate::live::devices::AudioDevices;
use crate::live::directive::SystemDirective;
use crate::live::events::{EventReceiver, EventSender, InboundEvent};
use crate::live::handle::{PendingResources, SessionHandle};
use crate::live::transcript::{TranscriptAggregator, TranscriptState};
use crate::live::transport::LiveConnector;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

const NOTICE_CAPACITY: usize = 256;

/// Lifecycle phase of the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Starting => "starting",
            SessionPhase::Active => "active",
            SessionPhase::Stopping => "stopping",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Things the presentation layer may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    Phase(SessionPhase),
    /// Transcript of the turn in progress
    Transcript(TranscriptState),
    /// A turn ended; carries what was said during it
    TurnComplete(TranscriptState),
    /// Playback was cut because the user barged in
    Interrupted { stopped_sources: usize },
    /// Session ended; `Some` when the remote side ended it
    Ended(Option<LiveError>),
}

/// Timeline of the playback scheduler, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackStatus {
    pub next_start_time: f64,
    pub active_sources: usize,
}

/// Audio rates and pump timing for sessions.
#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub reap_interval: Duration,
}

impl LiveSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            capture_sample_rate: config.audio.capture_sample_rate,
            playback_sample_rate: config.audio.playback_sample_rate,
            reap_interval: config.live.playback_reap_interval(),
        }
    }
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Drives one live voice session at a time.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

struct Inner {
    devices: Arc<dyn AudioDevices>,
    connector: Arc<dyn LiveConnector>,
    settings: LiveSettings,
    phase: watch::Sender<SessionPhase>,
    notices: broadcast::Sender<SessionNotice>,
    /// Raised by `stop()` while starting; every acquisition step races it
    cancel: watch::Sender<bool>,
    core: Mutex<Core>,
}

#[derive(Default)]
struct Core {
    handle: Option<SessionHandle>,
    scheduler: PlaybackScheduler,
    transcript: TranscriptAggregator,
    pump: Option<JoinHandle<()>>,
    last_exit: Option<LiveError>,
}

enum StopPlan {
    Nothing,
    AwaitIdle,
    Teardown(Option<SessionHandle>),
}

impl SessionController {
    pub fn new(
        devices: Arc<dyn AudioDevices>,
        connector: Arc<dyn LiveConnector>,
        settings: LiveSettings,
    ) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Idle);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                devices,
                connector,
                settings,
                phase,
                notices,
                cancel,
                core: Mutex::new(Core::default()),
            }),
        }
    }

    /// Start a session.
    ///
    /// ## Parameters:
    /// - **context_snapshot**: The caller's current scan data as JSON text. Malformed
    ///   input is tolerated (fallback directive).
    ///
    /// ## Returns:
    /// - **Ok(session_id)**: Session is `Active`
    /// - **Err(SessionBusy)**: A session is not `Idle`; nothing was touched
    /// - **Err(Cancelled)**: `stop()` was called while starting; everything acquired was released
    /// - **Err(other)**: Acquisition failed; everything acquired was released
    ///
    /// ## State Transition:
    /// Idle → Starting → Active, or back to Idle on failure.
    pub async fn start(&self, context_snapshot: &str) -> Result<String, LiveError> {
        {
            let mut core = self.lock_core();
            let phase = self.phase();
            if phase != SessionPhase::Idle {
                return Err(LiveError::SessionBusy(phase));
            }
            self.inner.cancel.send_replace(false);
            core.last_exit = None;
            self.set_phase(SessionPhase::Starting);
        }

        let session_id = Uuid::new_v4().to_string();
        info!(session_id = %session_id, "Starting live session");

        let directive = SystemDirective::from_snapshot(context_snapshot);
        debug!(session_id = %session_id, with_snapshot = directive.has_snapshot(), "System directive built");
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut pending = PendingResources::default();

        if let Err(err) = self.acquire(&mut pending, directive.text(), event_tx).await {
            let released = pending.release().await;
            match err {
                LiveError::Cancelled => info!(session_id = %session_id, released, "Live session start cancelled"),
                _ => warn!(session_id = %session_id, released, "Live session failed to start: {}", err),
            }
            self.finish_idle(None);
            return Err(err);
        }

        let mut handle = match pending.into_handle(session_id.clone()) {
            Ok(handle) => handle,
            Err(incomplete) => {
                let err = incomplete
                    .missing()
                    .unwrap_or_else(|| LiveError::DeviceUnavailable("incomplete session resources".to_string()));
                incomplete.release().await;
                self.finish_idle(None);
                return Err(err);
            }
        };
        let blocks = handle.take_microphone_blocks();

        let cancelled = {
            let mut core = self.lock_core();
            if *self.inner.cancel.borrow() {
                Some(handle)
            } else {
                core.scheduler.reset();
                core.transcript.clear();
                core.handle = Some(handle);
                core.pump = Some(tokio::spawn(run_pump(self.clone(), blocks, event_rx)));
                self.set_phase(SessionPhase::Active);
                None
            }
        };

        if let Some(handle) = cancelled {
            handle.release().await;
            info!(session_id = %session_id, "Live session start cancelled");
            self.finish_idle(None);
            return Err(LiveError::Cancelled);
        }

        info!(session_id = %session_id, "Live session active");
        Ok(session_id)
    }

    /// Stop the session and release every resource.
    ///
    /// Idempotent: a no-op when already `Idle`. Called during `Starting` it cancels the
    /// start and returns once the session is back to `Idle`.
    ///
    /// ## State Transition:
    /// Active → Stopping → Idle
    pub async fn stop(&self) {
        let plan = {
            let mut core = self.lock_core();
            match self.phase() {
                SessionPhase::Idle => StopPlan::Nothing,
                SessionPhase::Starting => {
                    self.inner.cancel.send_replace(true);
                    StopPlan::AwaitIdle
                }
                SessionPhase::Stopping => StopPlan::AwaitIdle,
                SessionPhase::Active => {
                    self.set_phase(SessionPhase::Stopping);
                    if let Some(pump) = core.pump.take() {
                        pump.abort();
                    }
                    StopPlan::Teardown(core.handle.take())
                }
            }
        };

        match plan {
            StopPlan::Nothing => debug!("Stop requested with no live session"),
            StopPlan::AwaitIdle => self.wait_for_idle().await,
            StopPlan::Teardown(handle) => {
                info!("Stopping live session");
                self.teardown(handle, None).await;
            }
        }
    }

    /// Schedule base64 PCM16 audio (for example synthesized narration) on the session's
    /// playback timeline.
    ///
    /// ## Errors:
    /// - `NotActive` unless the session is `Active`
    /// - `DecodeFailure` for a malformed payload
    pub fn play_audio(&self, pcm_base64: &str) -> Result<PlaybackSource, LiveError> {
        let mut guard = self.lock_core();
        if self.phase() != SessionPhase::Active {
            return Err(LiveError::NotActive);
        }
        let buffer = decode_base64_pcm(pcm_base64, self.inner.settings.playback_sample_rate)?;

        let core = &mut *guard;
        let handle = core.handle.as_mut().ok_or(LiveError::NotActive)?;
        Ok(core.scheduler.enqueue(handle.playback_mut(), buffer))
    }

    pub fn phase(&self) -> SessionPhase {
        *self.inner.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.inner.notices.subscribe()
    }

    /// Transcript of the turn in progress (read-only copy).
    pub fn transcript(&self) -> TranscriptState {
        self.lock_core().transcript.state().clone()
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        let core = self.lock_core();
        PlaybackStatus {
            next_start_time: core.scheduler.next_start_time(),
            active_sources: core.scheduler.active_count(),
        }
    }

    /// Why the previous session ended, if the remote side ended it.
    pub fn last_exit(&self) -> Option<LiveError> {
        self.lock_core().last_exit.clone()
    }

    #[cfg(test)]
    pub fn holds_resources(&self) -> bool {
        self.lock_core().handle.is_some()
    }

    pub async fn wait_for_idle(&self) {
        let mut phase = self.subscribe_phase();
        let _ = phase.wait_for(|p| *p == SessionPhase::Idle).await;
    }

    async fn acquire(
        &self,
        pending: &mut PendingResources,
        directive: &str,
        events: EventSender,
    ) -> Result<(), LiveError> {
        let devices = &self.inner.devices;
        let settings = &self.inner.settings;

        pending.microphone = Some(self.cancellable(devices.request_microphone()).await?);
        pending.capture = Some(
            self.cancellable(devices.open_capture_context(settings.capture_sample_rate))
                .await?,
        );
        pending.playback = Some(
            self.cancellable(devices.open_playback_context(settings.playback_sample_rate))
                .await?,
        );
        pending.transport = Some(self.cancellable(self.inner.connector.connect(directive, events)).await?);
        Ok(())
    }

    /// Run one acquisition step unless `stop()` cancels the start first.
    ///
    /// A step that loses the race is dropped before it yields its resource, so a
    /// pending permission prompt or connection attempt ends immediately.
    async fn cancellable<T>(
        &self,
        step: impl Future<Output = Result<T, LiveError>>,
    ) -> Result<T, LiveError> {
        let mut cancel = self.inner.cancel.subscribe();
        tokio::select! {
            biased;
            _ = cancel.wait_for(|cancelled| *cancelled) => Err(LiveError::Cancelled),
            result = step => result,
        }
    }

    /// Handle one inbound event.
    ///
    /// ## Returns:
    /// `Some(reason)` when the event ends the session.
    pub(crate) fn dispatch(&self, event: InboundEvent) -> Option<LiveError> {
        let mut guard = self.lock_core();
        if self.phase() != SessionPhase::Active {
            debug!(kind = event.kind(), "Ignoring inbound event outside an active session");
            return None;
        }
        let core = &mut *guard;

        match event {
            InboundEvent::AudioPayload(data) => {
                match decode_base64_pcm(&data, self.inner.settings.playback_sample_rate) {
                    Ok(buffer) => {
                        if let Some(handle) = core.handle.as_mut() {
                            let source = core.scheduler.enqueue(handle.playback_mut(), buffer);
                            trace!(source_id = source.id, start_at = source.start_at, "Scheduled inbound audio");
                        }
                    }
                    Err(err) => warn!("Skipping inbound audio chunk: {}", err),
                }
                None
            }
            InboundEvent::Interrupted => {
                if let Some(handle) = core.handle.as_mut() {
                    let stopped = core.scheduler.interrupt(handle.playback_mut());
                    debug!(stopped = stopped.len(), "Playback interrupted");
                    self.notify(SessionNotice::Interrupted { stopped_sources: stopped.len() });
                }
                None
            }
            InboundEvent::InputTranscriptDelta(delta) => {
                core.transcript.append_user(&delta);
                self.notify(SessionNotice::Transcript(core.transcript.state().clone()));
                None
            }
            InboundEvent::OutputTranscriptDelta(delta) => {
                core.transcript.append_assistant(&delta);
                self.notify(SessionNotice::Transcript(core.transcript.state().clone()));
                None
            }
            InboundEvent::TurnComplete => {
                let finished = core.transcript.complete_turn();
                self.notify(SessionNotice::TurnComplete(finished));
                self.notify(SessionNotice::Transcript(TranscriptState::default()));
                None
            }
            InboundEvent::Closed => Some(LiveError::RemoteClosed),
            InboundEvent::Error(reason) => Some(LiveError::RemoteError(reason)),
        }
    }

    /// Push microphone samples through capture and out to the transport.
    pub(crate) fn on_capture_block(&self, samples: &[f32]) -> usize {
        let mut core = self.lock_core();
        if self.phase() != SessionPhase::Active {
            return 0;
        }
        match core.handle.as_mut() {
            Some(handle) => handle.forward_capture(samples),
            None => 0,
        }
    }

    pub(crate) fn reap_finished_sources(&self) {
        let mut guard = self.lock_core();
        let core = &mut *guard;
        if let Some(handle) = core.handle.as_mut() {
            let now = handle.playback_mut().current_time();
            let reaped = core.scheduler.reap(now);
            if reaped > 0 {
                trace!(reaped, "Reaped finished playback sources");
            }
        }
    }

    /// Teardown triggered from inside the pump (remote close or error).
    ///
    /// The pump detaches its own join handle instead of aborting itself, so the
    /// teardown below always runs to completion.
    async fn stop_from_pump(&self, reason: LiveError) {
        let handle = {
            let mut core = self.lock_core();
            if self.phase() != SessionPhase::Active {
                return;
            }
            self.set_phase(SessionPhase::Stopping);
            core.pump.take();
            core.handle.take()
        };

        match &reason {
            LiveError::RemoteClosed => info!("Live endpoint closed the session"),
            other => warn!("Live session ended by remote error: {}", other),
        }
        self.teardown(handle, Some(reason)).await;
    }

    async fn teardown(&self, handle: Option<SessionHandle>, exit: Option<LiveError>) {
        if let Some(handle) = handle {
            handle.release().await;
        }
        self.finish_idle(exit);
    }

    fn finish_idle(&self, exit: Option<LiveError>) {
        let mut core = self.lock_core();
        core.scheduler.reset();
        core.transcript.clear();
        self.inner.cancel.send_replace(false);
        core.last_exit = exit.clone();
        self.notify(SessionNotice::Transcript(TranscriptState::default()));
        self.notify(SessionNotice::Ended(exit));
        self.set_phase(SessionPhase::Idle);
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.inner.phase.send_replace(phase);
        self.notify(SessionNotice::Phase(phase));
    }

    fn notify(&self, notice: SessionNotice) {
        // no subscribers is fine
        let _ = self.inner.notices.send(notice);
    }

    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.inner
            .core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Single event-processing sequence of an active session.
async fn run_pump(
    controller: SessionController,
    blocks: Option<mpsc::Receiver<Vec<f32>>>,
    mut events: EventReceiver,
) {
    let mut reap = tokio::time::interval(controller.inner.settings.reap_interval);
    reap.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut mic_open = blocks.is_some();
    let mut blocks = blocks;

    let exit = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(exit) = controller.dispatch(event) {
                        break exit;
                    }
                }
                None => break LiveError::RemoteClosed,
            },
            block = next_block(&mut blocks), if mic_open => match block {
                Some(samples) => {
                    controller.on_capture_block(&samples);
                }
                None => {
                    debug!("Microphone stream ended");
                    mic_open = false;
                }
            },
            _ = reap.tick() => controller.reap_finished_sources(),
        }
    };

    controller.stop_from_pump(exit).await;
}

async fn next_block(blocks: &mut Option<mpsc::Receiver<Vec<f32>>>) -> Option<Vec<f32>> {
    match blocks {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::client::{BridgeOutput, ClientAudioDevices, ClientBridge};
    use crate::live::testing::{pcm_base64, FakeConnector, FakeDevices, PlaybackCall};
    use tokio::time::timeout;

    fn controller(devices: &Arc<FakeDevices>, connector: &Arc<FakeConnector>) -> SessionController {
        SessionController::new(devices.clone(), connector.clone(), LiveSettings::default())
    }

    #[tokio::test]
    async fn test_start_then_stop_releases_everything() {
        let devices = Arc::new(FakeDevices::new());
        let connector = Arc::new(FakeConnector::new(devices.log()));
        let session = controller(&devices, &connector);

        session.start(r#"{"asset":"ETH"}"#).await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Active);
        assert!(session.holds_resources());
        assert_eq!(devices.log().opened(), 4);
        assert!(connector.directives()[0].contains("\"asset\": \"ETH\""));

        session.stop().await;
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(!session.holds_resources());
        assert!(devices.log().all_released());

        // second stop is a no-op
        session.stop().await;
        assert_eq!(devices.log().transports_closed(), 1);
        assert_eq!(devices.log().microphones_released(), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_opens_nothing_else() {
        let devices = Arc::new(FakeDevices::new().denying_microphone());
        let connector = Arc::new(FakeConnector::new(devices.log()));
        let session = controller(&devices, &connector);

        let result = session.start("{}").await;
        assert!(matches!(result, Err(LiveError::PermissionDenied(_))));
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(devices.log().opened(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_releases_contexts() {
        let devices = Arc::new(FakeDevices::new());
        let connector = Arc::new(FakeConnector::new(devices.log()).failing());
        let session = controller(&devices, &connector);

        let result = session.start("{}").await;
        assert!(matches!(result, Err(LiveError::ConnectionFailed(_))));
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(devices.log().opened(), 3);
        assert!(devices.log().all_released());
    }

    #[tokio::test]
    async fn test_start_while_active_is_rejected() {
        let devices = Arc::new(FakeDevices::new());
        let connector = Arc::new(FakeConnector::new(devices.log()));
        let session = controller(&devices, &connector);

        session.start("{}").await.unwrap();
        let second = session.start("{}").await;
        assert_eq!(second, Err(LiveError::SessionBusy(SessionPhase::Active)));
        assert_eq!(devices.log().opened(), 4);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_during_start_releases_acquired_resources() {
        // connect never resolves on its own
        let gate = Arc::new(tokio::sync::Notify::new());
        let devices = Arc::new(FakeDevices::new());
        let connector = Arc::new(FakeConnector::new(devices.log()).with_gate(gate));
        let session = controller(&devices, &connector);

        let starter = {
            let session = session.clone();
            tokio::spawn(async move { session.start("{}").await })
        };
        while devices.log().opened() < 3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.phase(), SessionPhase::Starting);

        timeout(Duration::from_secs(1), session.stop()).await.unwrap();
        assert_eq!(starter.await.unwrap(), Err(LiveError::Cancelled));

        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(devices.log().microphones_released(), 1);
        assert!(devices.log().all_released());
        assert_eq!(devices.log().transports_closed(), 0);
        assert!(connector.directives().is_empty());
    }

    #[tokio::test]
    async fn test_stop_ends_unanswered_microphone_prompt() {
        let (bridge, mut outputs) = ClientBridge::new();
        let devices = Arc::new(ClientAudioDevices::new(bridge.clone(), &AppConfig::default()));
        let connector = Arc::new(FakeConnector::new(FakeDevices::new().log()));
        let session = SessionController::new(devices, connector.clone(), LiveSettings::default());

        let starter = {
            let session = session.clone();
            tokio::spawn(async move { session.start("{}").await })
        };
        assert!(matches!(outputs.recv().await, Some(BridgeOutput::MicrophoneRequest)));

        timeout(Duration::from_secs(1), session.stop()).await.unwrap();
        assert_eq!(starter.await.unwrap(), Err(LiveError::Cancelled));
        assert_eq!(session.phase(), SessionPhase::Idle);

        // a late grant opens nothing
        assert!(!bridge.answer_permission(true));
        assert!(!bridge.microphone_open());
        assert!(connector.directives().is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_clears_playback() {
        let devices = Arc::new(FakeDevices::new());
        let connector = Arc::new(FakeConnector::new(devices.log()));
        let session = controller(&devices, &connector);
        session.start("{}").await.unwrap();

        // 0.5s each at 24 kHz
        session.dispatch(InboundEvent::AudioPayload(pcm_base64(12_000)));
        session.dispatch(InboundEvent::AudioPayload(pcm_base64(12_000)));
        assert_eq!(session.playback_status().active_sources, 2);
        assert_eq!(session.playback_status().next_start_time, 1.0);

        session.dispatch(InboundEvent::Interrupted);
        let status = session.playback_status();
        assert_eq!(status.active_sources, 0);
        assert_eq!(status.next_start_time, 0.0);
        assert_eq!(
            devices.playback_calls().iter().filter(|c| matches!(c, PlaybackCall::Stop(_))).count(),
            2
        );

        devices.set_clock(0.25);
        let next = session.play_audio(&pcm_base64(2_400)).unwrap();
        assert_eq!(next.start_at, 0.25);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_session_running() {
        let devices = Arc::new(FakeDevices::new());
        let connector = Arc::new(FakeConnector::new(devices.log()));
        let session = controller(&devices, &connector);
        session.start("{}").await.unwrap();

        assert!(session.dispatch(InboundEvent::AudioPayload("***".to_string())).is_none());
        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(session.playback_status().active_sources, 0);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_transcript_accumulates_and_resets() {
        let devices = Arc::new(FakeDevices::new());
        let connector = Arc::new(FakeConnector::new(devices.log()));
        let session = controller(&devices, &connector);
        let mut notices = session.subscribe();
        session.start("{}").await.unwrap();

        session.dispatch(InboundEvent::InputTranscriptDelta("Is it ".into()));
        session.dispatch(InboundEvent::InputTranscriptDelta("safe?".into()));
        session.dispatch(InboundEvent::OutputTranscriptDelta("High risk.".into()));
        assert_eq!(session.transcript().user, "Is it safe?");
        assert_eq!(session.transcript().assistant, "High risk.");

        session.dispatch(InboundEvent::TurnComplete);
        assert!(session.transcript().is_empty());

        let mut finished = None;
        while let Ok(notice) = notices.try_recv() {
            if let SessionNotice::TurnComplete(turn) = notice {
                finished = Some(turn);
            }
        }
        assert_eq!(finished.unwrap().user, "Is it safe?");

        session.stop().await;
    }

    #[tokio::test]
    async fn test_capture_frames_are_sent() {
        let devices = Arc::new(FakeDevices::new());
        let connector = Arc::new(FakeConnector::new(devices.log()));
        let session = controller(&devices, &connector);
        session.start("{}").await.unwrap();

        assert_eq!(session.on_capture_block(&vec![0.0; 4000]), 0);
        assert_eq!(session.on_capture_block(&vec![0.0; 200]), 1);

        let sent = connector.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].mime_type, "audio/pcm;rate=16000");

        session.stop().await;
    }

    #[tokio::test]
    async fn test_remote_close_tears_down() {
        let devices = Arc::new(FakeDevices::new());
        let connector = Arc::new(FakeConnector::new(devices.log()));
        let session = controller(&devices, &connector);
        session.start("{}").await.unwrap();

        assert!(connector.emit(InboundEvent::Error("socket reset".into())));
        timeout(Duration::from_secs(1), session.wait_for_idle()).await.unwrap();

        assert!(devices.log().all_released());
        assert_eq!(session.last_exit(), Some(LiveError::RemoteError("socket reset".into())));

        // stop after a remote exit is a no-op
        session.stop().await;
        assert_eq!(devices.log().transports_closed(), 1);
    }

    #[tokio::test]
    async fn test_narration_requires_active_session() {
        let devices = Arc::new(FakeDevices::new());
        let connector = Arc::new(FakeConnector::new(devices.log()));
        let session = controller(&devices, &connector);

        assert_eq!(session.play_audio(&pcm_base64(10)), Err(LiveError::NotActive));
    }
}
