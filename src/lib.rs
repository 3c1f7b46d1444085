//! Robocast - robot video fanout over WebRTC
//!
//! A hub on the robot streams VP8 frames to every connected peer and relays
//! control commands between them; operator and recorder clients reconnect
//! on their own and hand frames and commands to local sinks.

pub mod args;
pub mod capture;
pub mod config;
pub mod error;
pub mod fanout;
pub mod input;
pub mod logging;
pub mod runtime_settings;
pub mod sink;
pub mod transport;
pub mod webrtc;

// Re-exports
pub use config::Config;
pub use error::SignalingError;
pub use fanout::MediaFanout;
pub use transport::{ClientEndpoint, HubServer, ReconnectPolicy};
pub use webrtc::{Command, SessionRegistry, SignalingMessage};
