//! Video frame data structure
//!
//! Represents one encoded video sample with capture metadata.

use bytes::Bytes;
use std::fmt;
use std::time::{Duration, Instant};

/// RTP video clock rate
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Overlay state captured when the frame was produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlaySnapshot {
    /// Whether the stream was playing (false after a `pause` command)
    pub playing: bool,
    /// Overlay text at production time
    pub text: Option<String>,
}

/// One video sample
///
/// Payload bytes are reference-counted so every destination shares the same
/// buffer; frames are never mutated after they leave the producer.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame sequence number
    pub sequence: u64,

    /// Encoded payload
    pub data: Bytes,

    /// Presentation timestamp in 90 kHz units
    pub pts: u32,

    /// Nominal frame duration
    pub duration: Duration,

    /// Capture (or arrival) time in the local monotonic clock
    pub captured_at: Instant,

    /// Overlay state at production time
    pub overlay: OverlaySnapshot,
}

impl Frame {
    pub fn new(sequence: u64, data: Bytes, pts: u32, duration: Duration) -> Self {
        Self {
            sequence,
            data,
            pts,
            duration,
            captured_at: Instant::now(),
            overlay: OverlaySnapshot { playing: true, text: None },
        }
    }

    /// Convert an elapsed duration to 90 kHz ticks (wrapping like RTP timestamps)
    pub fn pts_from_elapsed(elapsed: Duration) -> u32 {
        let ticks = elapsed.as_micros() * VIDEO_CLOCK_RATE as u128 / 1_000_000;
        (ticks % (u32::MAX as u128 + 1)) as u32
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame({} bytes, seq={}, pts={})",
            self.data.len(),
            self.sequence,
            self.pts
        )
    }
}

/// Frame statistics for monitoring
#[derive(Debug, Default, Clone)]
pub struct FrameStats {
    /// Total frames produced
    pub total_frames: u64,

    /// Total bytes produced
    pub total_bytes: u64,

    /// Frames that took longer than the target interval
    pub overruns: u64,

    /// Last production time in microseconds
    pub last_capture_time_us: u64,
}

impl FrameStats {
    /// Record a frame production
    pub fn record_capture(&mut self, bytes: usize, time_us: u64, overrun: bool) {
        self.total_frames += 1;
        self.total_bytes += bytes as u64;
        self.last_capture_time_us = time_us;
        if overrun {
            self.overruns += 1;
        }
    }
}
