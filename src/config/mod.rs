//! Configuration management for robocast

use crate::transport::backoff::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hub (robot) signaling server
    pub hub: HubConfig,

    /// Client (operator / recorder) signaling connection
    pub client: ClientConfig,

    /// Reconnect policies per client role
    pub reconnect: ReconnectConfig,

    /// Frame production and fanout
    pub fanout: FanoutConfig,

    /// Recorder output files
    pub recorder: RecorderConfig,

    /// WebRTC transport
    pub webrtc: WebRTCConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// WebSocket keepalive settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Ping interval in seconds (0 disables keepalive)
    pub ping_interval_secs: u64,

    /// Time allowed for the pong before the channel is dropped
    pub ping_timeout_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 10,
            ping_timeout_secs: 5,
        }
    }
}

impl KeepaliveConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Bind address
    pub host: String,

    /// Signaling port
    pub port: u16,

    /// Maximum concurrent sessions
    pub max_sessions: usize,

    /// Channel keepalive
    pub keepalive: KeepaliveConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            max_sessions: 10,
            keepalive: KeepaliveConfig::default(),
        }
    }
}

impl HubConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Hub WebSocket URI
    pub uri: String,

    /// Channel keepalive
    pub keepalive: KeepaliveConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uri: "ws://robot:8765".to_string(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Policy for the interactive operator client
    pub operator: ReconnectPolicy,

    /// Policy for the recorder client
    pub recorder: ReconnectPolicy,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            operator: ReconnectPolicy::operator_default(),
            recorder: ReconnectPolicy::recorder_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Target frame rate
    pub target_fps: u32,

    /// Per-session outbound queue depth in frames
    pub queue_depth: usize,

    /// Primary capture stream (IVF, VP8)
    pub capture_path: Option<PathBuf>,

    /// Recorded fallback stream, looped (IVF, VP8)
    pub recorded_path: Option<PathBuf>,

    /// Synthetic test pattern width
    pub synthetic_width: u16,

    /// Synthetic test pattern height
    pub synthetic_height: u16,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            target_fps: 30,
            queue_depth: 8,
            capture_path: Some(PathBuf::from("capture.ivf")),
            recorded_path: Some(PathBuf::from("sample.ivf")),
            synthetic_width: 320,
            synthetic_height: 240,
        }
    }
}

impl FanoutConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.target_fps.max(1) as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Output directory, created on start-up
    pub output_dir: PathBuf,

    /// Video file name stem; sessions are numbered (`recording-001.ivf`)
    pub video_stem: String,

    /// NDJSON command log file name
    pub command_log: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            video_stem: "recording".to_string(),
            command_log: "commands.jsonl".to_string(),
        }
    }
}

impl RecorderConfig {
    pub fn command_log_path(&self) -> PathBuf {
        self.output_dir.join(&self.command_log)
    }

    pub fn video_path(&self, session_index: u32) -> PathBuf {
        self.output_dir
            .join(format!("{}-{:03}.ivf", self.video_stem, session_index))
    }
}

/// WebRTC transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRTCConfig {
    /// STUN/TURN URLs, e.g. `stun:stun.l.google.com:19302`
    pub ice_servers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.hub.bind_addr().parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Hub bind address {} must be in ip:port format", self.hub.bind_addr()).into());
        }

        if self.hub.max_sessions == 0 {
            return Err("Hub max_sessions must be non-zero".into());
        }

        if !self.client.uri.starts_with("ws://") && !self.client.uri.starts_with("wss://") {
            return Err("Client uri must start with ws:// or wss://".into());
        }

        if self.fanout.target_fps == 0 {
            return Err("Fanout target_fps must be non-zero".into());
        }

        if self.fanout.queue_depth == 0 {
            return Err("Fanout queue_depth must be non-zero".into());
        }

        for keepalive in [&self.hub.keepalive, &self.client.keepalive] {
            if keepalive.ping_interval_secs > 0 && keepalive.ping_timeout_secs == 0 {
                return Err("Keepalive ping_timeout_secs must be non-zero when pings are enabled".into());
            }
        }

        self.reconnect.operator.validate()?;
        self.reconnect.recorder.validate()?;

        if self.recorder.video_stem.is_empty() || self.recorder.command_log.is_empty() {
            return Err("Recorder file names must not be empty".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.hub.bind_addr(), "0.0.0.0:8765");
        assert_eq!(cfg.client.uri, "ws://robot:8765");
        assert_eq!(cfg.hub.keepalive.interval(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn validate_rejects_zero_fps() {
        let mut cfg = Config::default();
        cfg.fanout.target_fps = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_uri() {
        let mut cfg = Config::default();
        cfg.client.uri = "http://robot:8765".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [hub]
            port = 9000

            [reconnect.operator]
            policy = "fixed"
            delay_secs = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.hub.port, 9000);
        assert_eq!(cfg.hub.host, "0.0.0.0");
        assert_eq!(cfg.reconnect.operator, ReconnectPolicy::Fixed { delay_secs: 0.5 });
        assert_eq!(cfg.reconnect.recorder, ReconnectPolicy::recorder_default());
    }

    #[test]
    fn recorder_paths() {
        let cfg = RecorderConfig::default();
        assert_eq!(cfg.video_path(1), PathBuf::from("output/recording-001.ivf"));
        assert_eq!(cfg.command_log_path(), PathBuf::from("output/commands.jsonl"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/robocast.toml")).unwrap();
        assert_eq!(cfg.fanout.target_fps, 30);
    }
}
