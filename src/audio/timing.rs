// Audio clock - sample counter driven by the audio callback
//
// This is the synthesis clock the metronome schedules against. It only
// moves when frames are rendered, so it runs ahead of the frame clock by
// roughly one device buffer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared synthesis clock
#[derive(Debug, Clone)]
pub struct AudioClock {
    /// Frames rendered so far (incremented by the audio callback)
    frames: Arc<AtomicU64>,
    sample_rate: f64,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: sample_rate.max(1) as f64,
        }
    }

    /// Frames rendered so far
    pub fn current_frame(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Advance by `frames` (called once per rendered buffer)
    pub fn advance(&self, frames: usize) {
        self.frames.fetch_add(frames as u64, Ordering::Release);
    }

    /// Clock time in seconds
    pub fn seconds(&self) -> f64 {
        self.current_frame() as f64 / self.sample_rate
    }

    /// Frame index of an absolute clock time; times before zero map to frame 0
    pub fn seconds_to_frame(&self, seconds: f64) -> u64 {
        if seconds <= 0.0 {
            0
        } else {
            (seconds * self.sample_rate).round() as u64
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate as u32
    }
}
