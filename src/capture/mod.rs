//! Video capture sources
//!
//! Encoded VP8 frames come from an IVF stream (live capture or a looped
//! recording) with a synthetic test pattern as the last resort.

pub mod capturer;
pub mod frame;
pub mod ivf;
pub mod synthetic;

pub use capturer::{CaptureChain, CaptureError, FrameSource, IvfFileSource};
pub use frame::{Frame, FrameStats, OverlaySnapshot};
pub use synthetic::SyntheticSource;
