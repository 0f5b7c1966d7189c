#![forbid(unsafe_code)]

use anyhow::Result;
use roomrelay::config::Config;
use roomrelay::media::MediaServer;
use roomrelay::metrics::ServerMetrics;
use roomrelay::room::{RoomRegistry, RoomSettings};
use roomrelay::signaling::SignalingServer;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomrelay=debug,mediasoup=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("roomrelay - Starting server");

    let config = Config::from_env()?;
    let metrics = ServerMetrics::new();

    let media = Arc::new(MediaServer::new(config.media.clone()).await?);
    let registry = Arc::new(RoomRegistry::new(
        media.clone(),
        RoomSettings::from(&config),
        metrics.clone(),
    ));
    info!("Media server initialized");

    let signaling_server = SignalingServer::new(registry.clone(), metrics, config.max_connections);

    tokio::select! {
        result = signaling_server.serve(config.port) => {
            if let Err(e) = result {
                tracing::error!("Signaling server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    registry.shutdown();
    media.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
