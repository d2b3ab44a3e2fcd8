use iomt_overlay::{ChannelConfig, ChannelRole, PresenceRegistry};
use tracing_subscriber::EnvFilter;

// ========================================
// MAP MANAGER ENTRY POINT
// ========================================

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("OVERLAY_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match ChannelConfig::from_env(ChannelRole::Registry) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("[MapManager] Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("[MapManager] Starting on {} (project {})", config.broker, config.project_name);

    let registry = match PresenceRegistry::new(config) {
        Ok(registry) => registry,
        Err(e) => {
            tracing::error!("[MapManager] Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    let runner = registry.clone();
    tokio::spawn(async move {
        runner.connect().await;
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("[MapManager] Failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("[MapManager] Shutting down...");
    registry.close();
    registry.disconnect().await;
}
