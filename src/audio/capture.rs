//! # Capture Contexts
//!
//! A capture context sits between the microphone stream and the encoder. It receives
//! raw sample blocks of whatever size the source produces and hands back fixed-size
//! `CaptureFrame`s (4096 samples by default) at the capture rate.

use crate::audio::pcm::CaptureFrame;
use std::collections::VecDeque;

/// Default number of samples per capture frame.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Audio processing graph fed by the microphone.
pub trait CaptureContext: Send {
    fn sample_rate(&self) -> u32;

    /// Feed raw microphone samples and collect every complete frame now available.
    fn process(&mut self, samples: &[f32]) -> Vec<CaptureFrame>;

    /// Close the context. Buffered partial frames are discarded.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Re-frames arbitrary sample blocks into fixed-size frames.
///
/// Uses a `VecDeque` so samples can be pushed at the back and drained from the front
/// without shifting the whole buffer.
#[derive(Debug)]
pub struct FramingCaptureContext {
    sample_rate: u32,
    frame_size: usize,
    pending: VecDeque<f32>,
    closed: bool,
}

impl FramingCaptureContext {
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            sample_rate,
            frame_size,
            pending: VecDeque::with_capacity(frame_size * 2),
            closed: false,
        }
    }

    /// Samples buffered but not yet emitted as a frame.
    #[cfg(test)]
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}

impl CaptureContext for FramingCaptureContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn process(&mut self, samples: &[f32]) -> Vec<CaptureFrame> {
        if self.closed {
            return Vec::new();
        }

        self.pending.extend(samples.iter().copied());

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let frame: Vec<f32> = self.pending.drain(..self.frame_size).collect();
            frames.push(CaptureFrame::new(frame, self.sample_rate));
        }
        frames
    }

    fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
