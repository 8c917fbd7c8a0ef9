//! # Gapless Playback Scheduling
//!
//! Inbound audio arrives as a stream of short buffers. To play them back-to-back with
//! no gaps or overlaps, each buffer is scheduled at a running `next_start_time` on the
//! playback context's clock, and the cursor advances by the buffer's duration.
//!
//! ## Scheduling Rule:
//! ```text
//! start_at        = max(next_start_time, context.current_time())
//! next_start_time = start_at + buffer.duration()
//! ```
//!
//! ## Interruption:
//! When the remote side signals that the user barged in, every scheduled source is
//! stopped, the active set is cleared and the cursor goes back to 0, so the next
//! buffer starts at the context's current time.
//!
//! ## Rust Concepts:
//! - **Trait objects**: The scheduler drives any `PlaybackContext` through `&mut dyn`,
//!   which lets tests substitute a manual clock for the real one.
//! - **BTreeMap**: Keeps active sources ordered by id, so stop order is deterministic.

use crate::audio::pcm::DecodedBuffer;
use std::collections::BTreeMap;

/// Identifier of a scheduled playback source.
pub type SourceId = u64;

/// Audio output graph with a monotonically increasing clock (seconds).
pub trait PlaybackContext: Send {
    fn sample_rate(&self) -> u32;

    /// Current time on the context's clock, in seconds.
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to start playing at `start_at` (context clock).
    fn start_source(&mut self, id: SourceId, buffer: &DecodedBuffer, start_at: f64);

    /// Stop a scheduled or playing source.
    fn stop_source(&mut self, id: SourceId);

    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// A buffer placed on the playback timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSource {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

impl PlaybackSource {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Tracks the playback cursor and the set of sources not yet finished.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start_time: f64,
    active: BTreeMap<SourceId, PlaybackSource>,
    next_id: SourceId,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a decoded buffer right after everything already queued.
    ///
    /// ## Parameters:
    /// - **ctx**: Playback context that will actually play the buffer
    /// - **buffer**: Decoded inbound audio
    ///
    /// ## Returns:
    /// The `PlaybackSource` describing where the buffer landed on the timeline.
    pub fn enqueue(&mut self, ctx: &mut dyn PlaybackContext, buffer: DecodedBuffer) -> PlaybackSource {
        let now = ctx.current_time();
        self.reap(now);

        let start_at = self.next_start_time.max(now);
        let source = PlaybackSource {
            id: self.next_id,
            start_at,
            duration: buffer.duration(),
        };
        self.next_id += 1;

        ctx.start_source(source.id, &buffer, source.start_at);
        self.next_start_time = source.end_at();
        self.active.insert(source.id, source.clone());
        source
    }

    /// Stop every active source and rewind the cursor.
    ///
    /// ## Returns:
    /// Ids of the sources that were stopped, in ascending order.
    pub fn interrupt(&mut self, ctx: &mut dyn PlaybackContext) -> Vec<SourceId> {
        let stopped: Vec<SourceId> = self.active.keys().copied().collect();
        for id in &stopped {
            ctx.stop_source(*id);
        }
        self.active.clear();
        self.next_start_time = 0.0;
        stopped
    }

    /// Drop every source whose end time has passed.
    ///
    /// ## Returns:
    /// Number of sources removed.
    pub fn reap(&mut self, now: f64) -> usize {
        let before = self.active.len();
        self.active.retain(|_, source| source.end_at() > now);
        before - self.active.len()
    }

    /// Forget all state without touching any context (used during teardown).
    pub fn reset(&mut self) {
        self.active.clear();
        self.next_start_time = 0.0;
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_sources(&self) -> impl Iterator<Item = &PlaybackSource> {
        self.active.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Playback context whose clock only moves when the test says so.
    #[derive(Default)]
    struct ManualClock {
        now: f64,
        started: Vec<(SourceId, f64)>,
        stopped: Vec<SourceId>,
        closed: bool,
    }

    impl PlaybackContext for ManualClock {
        fn sample_rate(&self) -> u32 {
            24_000
        }

        fn current_time(&self) -> f64 {
            self.now
        }

        fn start_source(&mut self, id: SourceId, _buffer: &DecodedBuffer, start_at: f64) {
            self.started.push((id, start_at));
        }

        fn stop_source(&mut self, id: SourceId) {
            self.stopped.push(id);
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    fn buffer(seconds: f64) -> DecodedBuffer {
        DecodedBuffer {
            samples: vec![0.0; (seconds * 24_000.0) as usize],
            sample_rate: 24_000,
        }
    }

    #[test]
    fn test_buffers_play_back_to_back() {
        let mut ctx = ManualClock::default();
        let mut scheduler = PlaybackScheduler::new();

        let first = scheduler.enqueue(&mut ctx, buffer(0.5));
        let second = scheduler.enqueue(&mut ctx, buffer(0.25));
        let third = scheduler.enqueue(&mut ctx, buffer(1.0));

        assert_eq!(first.start_at, 0.0);
        assert_eq!(second.start_at, 0.5);
        assert_eq!(third.start_at, 0.75);
        assert_eq!(scheduler.next_start_time(), 1.75);
        assert_eq!(scheduler.active_count(), 3);
    }

    #[test]
    fn test_late_buffer_starts_at_current_time() {
        let mut ctx = ManualClock::default();
        let mut scheduler = PlaybackScheduler::new();

        scheduler.enqueue(&mut ctx, buffer(0.5));
        ctx.now = 2.0;
        let late = scheduler.enqueue(&mut ctx, buffer(0.5));

        assert_eq!(late.start_at, 2.0);
        assert_eq!(scheduler.next_start_time(), 2.5);
        // the first source ended at 0.5 and was reaped on enqueue
        assert_eq!(scheduler.active_count(), 1);
    }

    #[test]
    fn test_interrupt_stops_everything_and_rewinds() {
        let mut ctx = ManualClock::default();
        let mut scheduler = PlaybackScheduler::new();

        scheduler.enqueue(&mut ctx, buffer(0.5));
        scheduler.enqueue(&mut ctx, buffer(0.5));

        let stopped = scheduler.interrupt(&mut ctx);
        assert_eq!(stopped, vec![0, 1]);
        assert_eq!(ctx.stopped, vec![0, 1]);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);

        ctx.now = 0.3;
        let next = scheduler.enqueue(&mut ctx, buffer(0.1));
        assert_eq!(next.start_at, 0.3);
    }

    #[test]
    fn test_reap_finished_sources() {
        let mut ctx = ManualClock::default();
        let mut scheduler = PlaybackScheduler::new();

        scheduler.enqueue(&mut ctx, buffer(0.5));
        scheduler.enqueue(&mut ctx, buffer(0.5));

        assert_eq!(scheduler.reap(0.4), 0);
        assert_eq!(scheduler.reap(0.5), 1);
        assert_eq!(scheduler.reap(0.9), 0);
        assert_eq!(scheduler.reap(1.0), 1);
        assert_eq!(scheduler.active_count(), 0);
    }
}
