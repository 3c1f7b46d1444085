//! Overlay state adjusted at runtime by relayed commands.

use crate::capture::OverlaySnapshot;
use crate::webrtc::signaling::{Command, CommandKind};
use log::{debug, info};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared `playing` flag and overlay text
///
/// Written by command handlers, read by the frame producer on every frame.
/// Readers only need the most recent value.
pub struct OverlayState {
    playing: AtomicBool,
    text: RwLock<Option<String>>,
}

impl Default for OverlayState {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayState {
    pub fn new() -> Self {
        Self {
            playing: AtomicBool::new(true),
            text: RwLock::new(None),
        }
    }

    pub fn playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn set_playing(&self, playing: bool) {
        let previous = self.playing.swap(playing, Ordering::Relaxed);
        if previous != playing {
            info!("Stream {}", if playing { "resumed" } else { "paused" });
        }
    }

    pub fn text(&self) -> Option<String> {
        self.text.read().clone()
    }

    /// Set the overlay text; an empty string clears it
    pub fn set_text(&self, text: &str) {
        let value = if text.is_empty() { None } else { Some(text.to_string()) };
        debug!("Overlay text set to {:?}", value);
        *self.text.write() = value;
    }

    /// Apply a relayed command
    pub fn apply_command(&self, command: &Command) {
        match command.kind {
            CommandKind::Pause => self.set_playing(false),
            CommandKind::Play => self.set_playing(true),
            CommandKind::Text => self.set_text(command.message.as_deref().unwrap_or("")),
        }
    }

    pub fn snapshot(&self) -> OverlaySnapshot {
        OverlaySnapshot {
            playing: self.playing(),
            text: self.text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_and_play_toggle_flag() {
        let state = OverlayState::new();
        assert!(state.playing());
        state.apply_command(&Command::pause());
        assert!(!state.playing());
        state.apply_command(&Command::play());
        assert!(state.playing());
    }

    #[test]
    fn text_command_sets_and_clears_overlay() {
        let state = OverlayState::new();
        state.apply_command(&Command::text("battery low"));
        assert_eq!(state.snapshot().text.as_deref(), Some("battery low"));
        state.apply_command(&Command { kind: CommandKind::Text, message: None });
        assert_eq!(state.text(), None);
    }
}
