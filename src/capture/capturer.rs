//! Frame source abstraction
//!
//! Provides a unified interface over the capture sources the fanout can read
//! from, plus the fallback chain that keeps the pipeline fed.

use super::frame::OverlaySnapshot;
use super::ivf::IvfReader;
use super::synthetic::SyntheticSource;
use crate::config::FanoutConfig;
use bytes::Bytes;
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Capture failures
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Source could not be opened
    #[error("capture source {0} unavailable: {1}")]
    Unavailable(String, String),

    /// Non-looping source reached its end
    #[error("capture source {0} reached end of stream")]
    EndOfStream(String),

    /// Read error
    #[error("capture source {0} read failed: {1}")]
    Read(String, io::Error),
}

/// Trait for frame source implementations
pub trait FrameSource: Send {
    /// Human readable source name for logs
    fn name(&self) -> &str;

    /// Produce the next encoded payload
    fn capture(&mut self, overlay: &OverlaySnapshot) -> Result<Bytes, CaptureError>;
}

/// Reads VP8 frames from an IVF file or stream
pub struct IvfFileSource {
    name: String,
    path: PathBuf,
    reader: IvfReader<BufReader<File>>,
    looping: bool,
}

impl IvfFileSource {
    /// Open an IVF source; `looping` rewinds at end of stream
    pub fn open(path: &Path, looping: bool) -> Result<Self, CaptureError> {
        let name = path.display().to_string();
        let reader = Self::open_reader(path)
            .map_err(|e| CaptureError::Unavailable(name.clone(), e.to_string()))?;
        Ok(Self {
            name,
            path: path.to_path_buf(),
            reader,
            looping,
        })
    }

    fn open_reader(path: &Path) -> io::Result<IvfReader<BufReader<File>>> {
        IvfReader::new(BufReader::new(File::open(path)?))
    }

    fn rewind(&mut self) -> Result<(), CaptureError> {
        self.reader = Self::open_reader(&self.path).map_err(|e| CaptureError::Read(self.name.clone(), e))?;
        Ok(())
    }
}

impl FrameSource for IvfFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&mut self, _overlay: &OverlaySnapshot) -> Result<Bytes, CaptureError> {
        match self.reader.read_frame() {
            Ok(Some(frame)) => return Ok(frame.data),
            Ok(None) if !self.looping => return Err(CaptureError::EndOfStream(self.name.clone())),
            Ok(None) => {}
            Err(e) => return Err(CaptureError::Read(self.name.clone(), e)),
        }

        // End of a looping source: start over once, fail if it is empty
        self.rewind()?;
        match self.reader.read_frame() {
            Ok(Some(frame)) => Ok(frame.data),
            Ok(None) => Err(CaptureError::EndOfStream(self.name.clone())),
            Err(e) => Err(CaptureError::Read(self.name.clone(), e)),
        }
    }
}

/// Ordered fallback chain of sources
///
/// The active source is demoted to the next one in line whenever it fails.
/// The last source should be one that cannot fail (the synthetic generator).
pub struct CaptureChain {
    sources: Vec<Box<dyn FrameSource>>,
    active: usize,
}

impl CaptureChain {
    pub fn new(sources: Vec<Box<dyn FrameSource>>) -> Self {
        Self { sources, active: 0 }
    }

    /// Build the primary -> recorded -> synthetic chain from configuration
    pub fn from_config(config: &FanoutConfig) -> Self {
        let mut sources: Vec<Box<dyn FrameSource>> = Vec::new();

        if let Some(ref path) = config.capture_path {
            match IvfFileSource::open(path, false) {
                Ok(source) => {
                    info!("Successfully opened capture source {}", path.display());
                    sources.push(Box::new(source));
                }
                Err(e) => warn!("{} - falling back to recorded source", e),
            }
        }

        if let Some(ref path) = config.recorded_path {
            match IvfFileSource::open(path, true) {
                Ok(source) => {
                    info!("Successfully opened recorded source {}", path.display());
                    sources.push(Box::new(source));
                }
                Err(e) => warn!("{} - switching to synthetic video feed", e),
            }
        }

        sources.push(Box::new(SyntheticSource::new(
            config.synthetic_width,
            config.synthetic_height,
        )));

        Self::new(sources)
    }

    /// Name of the source currently in use
    pub fn active_name(&self) -> &str {
        self.sources
            .get(self.active)
            .map(|s| s.name())
            .unwrap_or("none")
    }
}

impl FrameSource for CaptureChain {
    fn name(&self) -> &str {
        self.active_name()
    }

    fn capture(&mut self, overlay: &OverlaySnapshot) -> Result<Bytes, CaptureError> {
        loop {
            let Some(source) = self.sources.get_mut(self.active) else {
                return Err(CaptureError::Unavailable("chain".to_string(), "no sources left".to_string()));
            };
            match source.capture(overlay) {
                Ok(data) => return Ok(data),
                Err(e) if self.active + 1 < self.sources.len() => {
                    self.active += 1;
                    warn!("{} - falling back to {}", e, self.active_name());
                }
                Err(e) => return Err(e),
            }
        }
    }
}
