//! Device hub: executes control commands and reports its own power draw

use color_eyre::{eyre::eyre, Result};
use energysync::bus::BusConnection;
use energysync::config::AppConfig;
use energysync::control::{CommandDispatcher, LoggingExecutor};
use energysync::logging;
use energysync::telemetry::PublisherHandle;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init()?;

    let config = AppConfig::load().await?;
    let bus = BusConnection::mqtt(config.connection.clone(), "energysync-hub")?;
    info!(
        "Device hub connecting to {} (keep-alive {:?}, reconnect every {:?})",
        bus.config().broker_url,
        bus.config().keep_alive(),
        bus.config().reconnect_delay()
    );
    let dispatcher = CommandDispatcher::attach(&bus, LoggingExecutor)?;
    let publisher = PublisherHandle::spawn(bus.clone(), config.hub.clone())
        .map_err(|e| eyre!("Failed to start hub publisher: {}", e))?;
    bus.connect();

    info!("Device hub running, waiting for commands (Ctrl+C to stop)");
    tokio::signal::ctrl_c().await?;

    match publisher.stop().await {
        Ok(ticks) => info!("Hub publisher sent {} samples", ticks),
        Err(e) => warn!("Hub publisher did not stop cleanly: {}", e),
    }
    dispatcher.detach();
    info!(
        "Executed {} commands, rejected {}",
        dispatcher.executed(),
        dispatcher.rejected()
    );
    bus.disconnect().await;
    Ok(())
}
