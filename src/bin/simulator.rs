//! Standalone telemetry simulator

use color_eyre::{eyre::eyre, Result};
use energysync::bus::BusConnection;
use energysync::config::AppConfig;
use energysync::logging;
use energysync::telemetry::PublisherHandle;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init()?;

    let config = AppConfig::load().await?;
    let bus = BusConnection::mqtt(config.connection.clone(), "energysync-simulator")?;
    bus.connect();

    let publisher = PublisherHandle::spawn(bus.clone(), config.simulator.clone())
        .map_err(|e| eyre!("Failed to start simulator: {}", e))?;
    info!("Simulating {} on {}", config.simulator.appliance_name, publisher.topic());

    tokio::signal::ctrl_c().await?;

    let ticks = publisher.stop().await?;
    info!("Simulator stopped after {} samples", ticks);
    bus.disconnect().await;
    Ok(())
}
