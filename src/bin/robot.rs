//! Robot hub binary
//!
//! Captures (or synthesizes) VP8 frames, fans them out to every connected
//! peer over WebRTC and relays commands between peers.

use clap::Parser;
use log::{error, info};
use robocast::args::HubArgs;
use robocast::capture::CaptureChain;
use robocast::fanout::MediaFanout;
use robocast::logging::init_logging;
use robocast::runtime_settings::OverlayState;
use robocast::transport::HubServer;
use robocast::webrtc::WebRtcTransportFactory;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = HubArgs::parse();
    let config = args.load_config()?;
    init_logging(args.common.verbose, &config.logging.level);

    info!("robocast robot v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {:?}", args.common.config);

    let overlay = Arc::new(OverlayState::new());
    let fanout = Arc::new(MediaFanout::new(&config.fanout, overlay));
    let cancel = CancellationToken::new();

    let source = CaptureChain::from_config(&config.fanout);
    info!("Video source: {}", source.active_name());
    let producer = fanout.spawn_producer(Box::new(source), cancel.clone());

    let transports = Arc::new(WebRtcTransportFactory::new(&config.webrtc)?);
    let hub = Arc::new(HubServer::new(config.hub.clone(), fanout.clone(), transports));
    let listener = match hub.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.hub.bind_addr(), e);
            cancel.cancel();
            let _ = producer.await;
            return Err(e.into());
        }
    };
    let mut server = tokio::spawn(hub.clone().run(listener, cancel.clone()));

    tokio::select! {
        _ = signal::ctrl_c() => info!("Shutdown signal received"),
        result = &mut server => {
            if let Err(e) = result {
                error!("Signaling server task failed: {}", e);
            }
        }
    }

    info!("Initiating graceful shutdown...");
    cancel.cancel();
    if !server.is_finished() {
        if let Err(e) = server.await {
            error!("Signaling server task failed: {}", e);
        }
    }
    if let Err(e) = producer.await {
        error!("Frame producer task failed: {}", e);
    }

    let stats = fanout.stats();
    info!(
        "Produced {} frames ({} overruns), {} sessions served",
        stats.total_frames,
        stats.overruns,
        hub.registry().removed_count()
    );
    info!("Shutdown complete");
    Ok(())
}
