//! Consumers of received frames and commands

pub mod command_log;
pub mod display;
pub mod recording;

pub use command_log::CommandLog;
pub use display::LatencyDisplay;
pub use recording::RecordingSink;

use crate::capture::Frame;
use crate::webrtc::Command;
use log::info;
use std::io;

/// Receives decoded frames for one session at a time
///
/// `on_frame` is called once per delivered frame in arrival order;
/// `on_session_end` exactly once when the transport ends.
pub trait FrameSink: Send {
    fn on_frame(&mut self, frame: &Frame) -> io::Result<()>;

    fn on_session_end(&mut self) -> io::Result<()>;
}

/// Receives commands relayed from other peers, in receipt order
pub trait CommandSink: Send {
    fn on_command(&mut self, command: &Command) -> io::Result<()>;
}

/// Prints received commands as status lines
#[derive(Debug, Default)]
pub struct CommandPrinter;

impl CommandSink for CommandPrinter {
    fn on_command(&mut self, command: &Command) -> io::Result<()> {
        info!("Received command: {}", command);
        Ok(())
    }
}

/// Frame sink that drops everything
#[derive(Debug, Default)]
pub struct Discard;

impl FrameSink for Discard {
    fn on_frame(&mut self, _frame: &Frame) -> io::Result<()> {
        Ok(())
    }

    fn on_session_end(&mut self) -> io::Result<()> {
        Ok(())
    }
}
