//! Operator client binary
//!
//! Watches the robot's video (latency status lines when no window is
//! available) and sends pause/play/text commands typed at the terminal.

use clap::Parser;
use log::info;
use robocast::args::ClientArgs;
use robocast::input::spawn_input;
use robocast::logging::init_logging;
use robocast::sink::{CommandPrinter, LatencyDisplay};
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
    info!("robocast operator v{}", env!("CARGO_PKG_VERSION"));

    let transports = Arc::new(WebRtcTransportFactory::new(&config.webrtc)?);
    let client = ClientEndpoint::new(
        "operator",
        config.client.clone(),
        config.reconnect.operator.clone(),
        transports,
        Box::new(LatencyDisplay::new()),
        Box::new(CommandPrinter),
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
