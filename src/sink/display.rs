//! Operator display
//!
//! Headless stand-in for a video window: tracks frame rate and end-to-end
//! latency, printing a status line at most once per second. Latency anchors
//! the first frame's 90 kHz PTS to the local wall clock; later frames are
//! late by however much their arrival trails that timeline.

use super::FrameSink;
use crate::capture::frame::VIDEO_CLOCK_RATE;
use crate::capture::Frame;
use log::info;
use std::io;
use std::time::{Duration, Instant};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

pub struct LatencyDisplay {
    anchor: Option<(u32, Instant)>,
    last_report: Option<Instant>,
    frames: u64,
    frames_since_report: u64,
    last_latency: Duration,
}

impl Default for LatencyDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyDisplay {
    pub fn new() -> Self {
        Self {
            anchor: None,
            last_report: None,
            frames: 0,
            frames_since_report: 0,
            last_latency: Duration::ZERO,
        }
    }

    /// Latency of a frame with `pts` arriving at `now`
    pub fn observe(&mut self, pts: u32, now: Instant) -> Duration {
        let (anchor_pts, anchor_at) = *self.anchor.get_or_insert((pts, now));
        let media_elapsed = pts.wrapping_sub(anchor_pts) as u64;
        let expected = anchor_at + Duration::from_micros(media_elapsed * 1_000_000 / VIDEO_CLOCK_RATE as u64);
        let latency = now.saturating_duration_since(expected);
        self.last_latency = latency;
        latency
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn last_latency(&self) -> Duration {
        self.last_latency
    }
}

impl FrameSink for LatencyDisplay {
    fn on_frame(&mut self, frame: &Frame) -> io::Result<()> {
        let now = Instant::now();
        let latency = self.observe(frame.pts, now);
        self.frames += 1;
        self.frames_since_report += 1;

        if self.frames == 1 {
            info!("Receiving video ({} bytes first frame)", frame.data.len());
        }

        let since = self.last_report.get_or_insert(now);
        let elapsed = now.duration_since(*since);
        if elapsed >= REPORT_INTERVAL {
            let fps = self.frames_since_report as f64 / elapsed.as_secs_f64();
            info!(
                "Video: {:.1} fps, latency {:.1} ms, {} frames",
                fps,
                latency.as_secs_f64() * 1000.0,
                self.frames
            );
            self.last_report = Some(now);
            self.frames_since_report = 0;
        }
        Ok(())
    }

    fn on_session_end(&mut self) -> io::Result<()> {
        info!("Video track ended after {} frames", self.frames);
        self.anchor = None;
        self.last_report = None;
        self.frames = 0;
        self.frames_since_report = 0;
        Ok(())
    }
}
