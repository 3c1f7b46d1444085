//! Append-only NDJSON command log
//!
//! One line per received command:
//! `{"timestamp": <unix seconds>, "command": {"command": "text", "message": "..."}}`

use super::CommandSink;
use crate::webrtc::Command;
use log::info;
use serde_json::json;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CommandLog {
    path: PathBuf,
    file: File,
    written: u64,
}

impl CommandLog {
    /// Open (or create) the log for appending; parent directories are created
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!("Logging commands to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl CommandSink for CommandLog {
    fn on_command(&mut self, command: &Command) -> io::Result<()> {
        let line = json!({ "timestamp": unix_timestamp(), "command": command });
        // One write per line so concurrent readers never see a partial record
        self.file.write_all(format!("{}\n", line).as_bytes())?;
        self.file.flush()?;
        self.written += 1;
        Ok(())
    }
}
