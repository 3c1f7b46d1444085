//! Interactive command input
//!
//! When a terminal is attached, stdin lines map to commands:
//! `p` pause, `r` resume, `t` prompt for overlay text (empty cancels),
//! `x` exit. Without a terminal the input path parks forever.

use crate::webrtc::Command;
use log::{debug, info, warn};
use std::io::{self, BufRead, IsTerminal, Write};
use tokio::sync::mpsc;

/// Input from the local user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalInput {
    /// Send a command to the hub
    Command(Command),
    /// Close the session and exit
    Exit,
}

/// Line-oriented key parser
#[derive(Debug, Default)]
pub struct InputParser {
    awaiting_text: bool,
}

impl InputParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True after `t`, until the next line
    pub fn awaiting_text(&self) -> bool {
        self.awaiting_text
    }

    pub fn feed(&mut self, line: &str) -> Option<LocalInput> {
        let line = line.trim_end_matches(['\r', '\n']);
        if self.awaiting_text {
            self.awaiting_text = false;
            if line.is_empty() {
                info!("Text command cancelled");
                return None;
            }
            return Some(LocalInput::Command(Command::text(line)));
        }

        match line.trim() {
            "p" => Some(LocalInput::Command(Command::pause())),
            "r" => Some(LocalInput::Command(Command::play())),
            "t" => {
                self.awaiting_text = true;
                None
            }
            "x" => Some(LocalInput::Exit),
            "" => None,
            other => {
                warn!("Unknown key {:?} (p=pause, r=resume, t=text, x=exit)", other);
                None
            }
        }
    }
}

/// Whether stdin is an interactive terminal
pub fn interactive() -> bool {
    io::stdin().is_terminal()
}

/// Start reading local input into `tx`
///
/// Interactive mode reads stdin on a detached thread so a blocked read never
/// holds up shutdown. Headless mode keeps `tx` alive in a task that never
/// wakes.
pub fn spawn_input(tx: mpsc::UnboundedSender<LocalInput>) {
    if !interactive() {
        info!("No terminal attached, command input disabled");
        tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        return;
    }

    info!("Keys: p=pause, r=resume, t=text, x=exit");
    std::thread::spawn(move || {
        let stdin = io::stdin();
        let mut parser = InputParser::new();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let input = parser.feed(&line);
            if parser.awaiting_text() {
                print!("Text: ");
                let _ = io::stdout().flush();
            }
            if let Some(input) = input {
                let exit = input == LocalInput::Exit;
                if tx.send(input).is_err() || exit {
                    break;
                }
            }
        }
        debug!("Input reader stopped");
    });
}
