//! Simulated dongle: one gateway with a single device, publishing a reading every second

use std::time::Duration;
use iomt_overlay::{ChannelConfig, ChannelRole, DeviceInfo, GatewayChannel, PublishOptions};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEVICE_ID: &str = "sim-device-1";

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("OVERLAY_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match ChannelConfig::from_env(ChannelRole::Gateway) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("[Simulator] Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let dongle_id = std::env::var("OVERLAY_DONGLE_ID").unwrap_or_else(|_| format!("dongle-{}", Uuid::new_v4()));
    let reading = std::env::var("OVERLAY_DATA").unwrap_or_else(|_| "{\"value\":42}".to_string());

    let channel = match GatewayChannel::new(&dongle_id, config) {
        Ok(channel) => channel,
        Err(e) => {
            tracing::error!("[Simulator] Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    channel.add_device(DeviceInfo::new(DEVICE_ID, "Simulated").with_attribute("firmware", "1.0"));
    channel.connect(None).await;
    tracing::info!("[Simulator] {} online, publishing every second", dongle_id);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                channel.publish_device(DEVICE_ID, reading.clone(), &PublishOptions::default()).await;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("[Simulator] Shutting down...");
    channel.close().await;
}
