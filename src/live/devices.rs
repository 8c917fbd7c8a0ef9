//! Audio device seam: microphone access and the two audio contexts a session needs.

use crate::audio::capture::CaptureContext;
use crate::audio::playback::PlaybackContext;
use crate::error::LiveError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A granted microphone.
pub trait MicrophoneStream: Send {
    /// Hand out the stream of raw sample blocks. Only the first call returns `Some`.
    fn take_blocks(&mut self) -> Option<mpsc::Receiver<Vec<f32>>>;

    /// Stop all tracks. The block stream ends once this is called.
    fn release(&mut self);

    fn is_released(&self) -> bool;
}

/// Source of the audio resources a live session acquires.
#[async_trait]
pub trait AudioDevices: Send + Sync {
    /// Ask for microphone access. May wait on the user.
    ///
    /// ## Errors:
    /// `LiveError::PermissionDenied` if access is refused or never answered.
    async fn request_microphone(&self) -> Result<Box<dyn MicrophoneStream>, LiveError>;

    async fn open_capture_context(&self, sample_rate: u32) -> Result<Box<dyn CaptureContext>, LiveError>;

    async fn open_playback_context(&self, sample_rate: u32) -> Result<Box<dyn PlaybackContext>, LiveError>;
}
