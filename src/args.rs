use clap::Parser;
use std::path::PathBuf;

use crate::config;

/// Flags shared by every binary
#[derive(clap::Args, Debug)]
pub struct CommonArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "robocast.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl CommonArgs {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }
}

#[derive(Parser, Debug)]
#[command(name = "robot")]
#[command(version)]
#[command(about = "Robot hub: streams video to every connected peer and relays commands", long_about = None)]
pub struct HubArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Listen host (overrides hub.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port (overrides hub.port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Captured IVF stream (overrides fanout.capture_path)
    #[arg(long)]
    pub capture: Option<PathBuf>,
}

impl HubArgs {
    /// Load the config file and apply command line overrides
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        let mut config = self.common.load_config()?;
        if let Some(ref host) = self.host {
            config.hub.host = host.clone();
        }
        if let Some(port) = self.port {
            config.hub.port = port;
        }
        if let Some(ref capture) = self.capture {
            config.fanout.capture_path = Some(capture.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Robocast client: receives the robot's video and exchanges commands", long_about = None)]
pub struct ClientArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Hub URI (overrides client.uri)
    #[arg(short, long)]
    pub uri: Option<String>,

    /// Recording directory (overrides recorder.output_dir)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

impl ClientArgs {
    /// Load the config file and apply command line overrides
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        let mut config = self.common.load_config()?;
        if let Some(ref uri) = self.uri {
            config.client.uri = uri.clone();
        }
        if let Some(ref dir) = self.output_dir {
            config.recorder.output_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_overrides_apply_over_defaults() {
        let args = HubArgs::parse_from(["robot", "--config", "/nonexistent/robocast.toml", "--port", "9000"]);
        let config = args.load_config().unwrap();
        assert_eq!(config.hub.port, 9000);
        assert_eq!(config.hub.host, "0.0.0.0");
    }

    #[test]
    fn client_overrides_apply_over_defaults() {
        let args = ClientArgs::parse_from([
            "recorder",
            "--config",
            "/nonexistent/robocast.toml",
            "--uri",
            "ws://127.0.0.1:9000",
            "--output-dir",
            "/tmp/rec",
            "-v",
        ]);
        assert!(args.common.verbose);
        let config = args.load_config().unwrap();
        assert_eq!(config.client.uri, "ws://127.0.0.1:9000");
        assert_eq!(config.recorder.output_dir, PathBuf::from("/tmp/rec"));
    }
}
