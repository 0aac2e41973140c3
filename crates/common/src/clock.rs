//! Clock and timing utilities for export pacing.
//!
//! Every export is paced by a fixed frame cadence. This module provides:
//! - A stopwatch anchored at export start (monotonic + wall clock)
//! - Frame/timestamp arithmetic for a constant frame rate
//! - Remaining-time estimation from a progress percentage

use std::time::Instant;

/// Measures wall time spent on one export.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    /// The instant the export started.
    started: Instant,

    /// Wall-clock time at start (RFC 3339).
    started_wall: String,
}

impl Stopwatch {
    /// Start a stopwatch anchored to now.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            started_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Milliseconds elapsed since start.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Wall-clock time at start.
    pub fn started_wall(&self) -> &str {
        &self.started_wall
    }
}

/// Frame arithmetic for a constant frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameClock {
    frame_rate: u32,
}

impl FrameClock {
    /// Create a clock for the given frame rate. A rate of zero is treated as 1.
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate.max(1),
        }
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Number of frames needed to cover `duration_ms`: `ceil(duration_ms / 1000 * fps)`.
    ///
    /// `None` when the product does not fit in a `u64`.
    pub fn total_frames(&self, duration_ms: u64) -> Option<u64> {
        let scaled = duration_ms.checked_mul(self.frame_rate as u64)?;
        Some(scaled.div_ceil(1000))
    }

    /// Distance between two frames in microseconds (truncated).
    pub fn frame_interval_us(&self) -> u64 {
        1_000_000 / self.frame_rate as u64
    }

    /// Presentation timestamp handed to the encoder for `frame`.
    pub fn presentation_time_us(&self, frame: u64) -> i64 {
        (frame * self.frame_interval_us()) as i64
    }

    /// Timeline position at which `frame` is rendered.
    pub fn timestamp_ms(&self, frame: u64) -> u64 {
        frame * 1000 / self.frame_rate as u64
    }
}

/// Estimate the remaining time from elapsed time and progress.
///
/// Returns 0 while no progress has been made.
pub fn estimate_remaining_ms(elapsed_ms: u64, progress_percent: f64) -> u64 {
    if progress_percent <= 0.0 || !progress_percent.is_finite() {
        return 0;
    }
    let total = elapsed_ms as f64 / progress_percent * 100.0;
    (total - elapsed_ms as f64).max(0.0).round() as u64
}
