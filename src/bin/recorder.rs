//! Recorder client binary
//!
//! Records every session's video to a numbered IVF file and appends each
//! received command to an NDJSON log.

use clap::Parser;
use log::info;
use robocast::args::ClientArgs;
use robocast::input::spawn_input;
use robocast::logging::init_logging;
use robocast::sink::{CommandLog, RecordingSink};
use robocast::transport::ClientEndpoint;
use robocast::webrtc::WebRtcTransportFactory;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();
    let config = args.load_config()?;
    init_logging(args.common.verbose, &config.logging.level);
    info!("robocast recorder v{}", env!("CARGO_PKG_VERSION"));

    let recording = RecordingSink::new(config.recorder.clone())?;
    info!("Recording to {}", recording.output_dir().display());
    let commands = CommandLog::open(&config.recorder.command_log_path())?;

    let transports = Arc::new(WebRtcTransportFactory::new(&config.webrtc)?);
    let client = ClientEndpoint::new(
        "recorder",
        config.client.clone(),
        config.reconnect.recorder.clone(),
        transports,
        Box::new(recording),
        Box::new(commands),
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    let (tx, rx) = mpsc::unbounded_channel();
    spawn_input(tx);

    client.run(rx, cancel).await?;
    info!("Shutdown complete");
    Ok(())
}
