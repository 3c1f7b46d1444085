//! Recorder video sink
//!
//! Writes each session's frames to its own numbered IVF file
//! (`<stem>-001.ivf`, `<stem>-002.ivf`, ...). A file is started on the first
//! frame of a session and flushed and closed when the session ends.

use super::FrameSink;
use crate::capture::ivf::{IvfHeader, IvfWriter};
use crate::capture::Frame;
use crate::config::RecorderConfig;
use log::{info, warn};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

const FALLBACK_WIDTH: u16 = 640;
const FALLBACK_HEIGHT: u16 = 480;

struct ActiveRecording {
    path: PathBuf,
    writer: IvfWriter<BufWriter<File>>,
    first_pts: u32,
}

pub struct RecordingSink {
    config: RecorderConfig,
    sessions: u32,
    active: Option<ActiveRecording>,
    completed: Vec<PathBuf>,
}

impl RecordingSink {
    /// Create the sink; the output directory is created up front
    pub fn new(config: RecorderConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.output_dir)?;
        Ok(Self {
            config,
            sessions: 0,
            active: None,
            completed: Vec::new(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Files finished so far
    pub fn completed(&self) -> &[PathBuf] {
        &self.completed
    }

    fn start(&mut self, frame: &Frame) -> io::Result<()> {
        self.sessions += 1;
        let path = self.config.video_path(self.sessions);
        let (width, height) = match vp8_dimensions(&frame.data) {
            Some(dimensions) => dimensions,
            None => {
                warn!(
                    "First frame is not a VP8 key frame (synthetic test pattern?); {} may not be playable",
                    path.display()
                );
                (FALLBACK_WIDTH, FALLBACK_HEIGHT)
            }
        };
        let file = BufWriter::new(File::create(&path)?);
        let writer = IvfWriter::new(file, &IvfHeader::vp8(width, height))?;
        info!("Recording video to {} ({}x{})", path.display(), width, height);
        self.active = Some(ActiveRecording {
            path,
            writer,
            first_pts: frame.pts,
        });
        Ok(())
    }
}

impl FrameSink for RecordingSink {
    fn on_frame(&mut self, frame: &Frame) -> io::Result<()> {
        if self.active.is_none() {
            self.start(frame)?;
        }
        let Some(recording) = self.active.as_mut() else {
            return Ok(());
        };
        let timestamp = frame.pts.wrapping_sub(recording.first_pts) as u64;
        recording.writer.write_frame(timestamp, &frame.data)
    }

    fn on_session_end(&mut self) -> io::Result<()> {
        let Some(mut recording) = self.active.take() else {
            return Ok(());
        };
        let frames = recording.writer.frames_written();
        let result = recording.writer.flush();
        match result {
            Ok(()) => info!("Recording stopped: {} frames written to {}", frames, recording.path.display()),
            Err(ref e) => warn!("Failed to flush {}: {}", recording.path.display(), e),
        }
        self.completed.push(recording.path);
        result
    }
}

/// Frame size from a VP8 key frame header, if `data` starts one
pub fn vp8_dimensions(data: &[u8]) -> Option<(u16, u16)> {
    if data.len() < 10 || data[0] & 0x01 != 0 || data[3..6] != [0x9d, 0x01, 0x2a] {
        return None;
    }
    let width = u16::from_le_bytes([data[6], data[7]]) & 0x3fff;
    let height = u16::from_le_bytes([data[8], data[9]]) & 0x3fff;
    (width > 0 && height > 0).then_some((width, height))
}
