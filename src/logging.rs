//! Logger setup shared by the binaries

/// Environment variable holding env_logger filter directives
pub const LOG_ENV: &str = "ROBOCAST_LOG";

/// Filter used when `ROBOCAST_LOG` is unset
pub fn default_filter(verbose: bool, configured: &str) -> String {
    if verbose {
        "debug".to_string()
    } else if configured.is_empty() {
        "info".to_string()
    } else {
        configured.to_string()
    }
}

/// Initialize env_logger with noise filtering for third-party WebRTC crates
pub fn init_logging(verbose: bool, configured: &str) {
    let filter = std::env::var(LOG_ENV).unwrap_or_else(|_| default_filter(verbose, configured));
    env_logger::Builder::new()
        .parse_filters(&filter)
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .init();
}
