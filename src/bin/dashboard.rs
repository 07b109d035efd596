//! Consumer side: live power window plus command entry on stdin
//!
//! Each stdin line is `<appliance name> <on|off>`, e.g. `Ceiling Fan on`.

use color_eyre::Result;
use energysync::bus::BusConnection;
use energysync::codec::Command;
use energysync::config::AppConfig;
use energysync::control::CommandIssuer;
use energysync::logging;
use energysync::telemetry::{AggregatorUpdate, TelemetryAggregator};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

fn report(update: &AggregatorUpdate) {
    let window: Vec<String> = update
        .window
        .iter()
        .map(|point| point.power.to_string())
        .collect();
    info!(
        "Live power {} kW, cost {:.2}/h, window [{}]",
        update.latest,
        update.instantaneous_cost,
        window.join(", ")
    );
}

fn parse_command_line(line: &str) -> Option<(&str, Command)> {
    let (name, action) = line.trim().rsplit_once(char::is_whitespace)?;
    let command = match action.to_ascii_uppercase().as_str() {
        "ON" => Command::On,
        "OFF" => Command::Off,
        _ => return None,
    };
    let name = name.trim();
    (!name.is_empty()).then_some((name, command))
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init()?;

    let config = AppConfig::load().await?;
    let bus = BusConnection::mqtt(config.connection.clone(), "energysync-dashboard")?;
    let aggregator = TelemetryAggregator::attach(&bus, &config.aggregator)?;
    aggregator.on_update(report);
    let issuer = CommandIssuer::new(bus.clone());
    bus.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command_line(&line) {
                    Some((name, command)) => {
                        if let Err(e) = issuer.send(name, command) {
                            warn!("Cannot address {:?}: {}", name, e);
                        }
                    }
                    None => warn!("Expected `<appliance name> <on|off>`, got {:?}", line),
                }
            }
        }
    }

    aggregator.detach();
    info!(
        "Dashboard closing: {} readings accepted, {} dropped",
        aggregator.accepted(),
        aggregator.dropped()
    );
    bus.disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_appliance_and_action() {
        assert_eq!(
            parse_command_line("Ceiling Fan on"),
            Some(("Ceiling Fan", Command::On))
        );
        assert_eq!(parse_command_line(" heater OFF "), Some(("heater", Command::Off)));
        assert_eq!(parse_command_line("heater toggle"), None);
        assert_eq!(parse_command_line("on"), None);
    }
}
