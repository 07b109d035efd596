#![allow(dead_code)]

use std::time::Duration;

use energysync::bus::{BusConnection, ConnectionState, MemoryBroker};
use energysync::config::ConnectionConfig;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        reconnect_delay_ms: 10,
        connect_timeout_secs: 1,
        ..ConnectionConfig::default()
    }
}

pub fn memory_bus(broker: &MemoryBroker, client_id: &str) -> BusConnection {
    BusConnection::new(fast_config(), broker.transport(client_id))
}

pub async fn wait_for_state(bus: &BusConnection, state: ConnectionState) {
    let mut rx = bus.watch_state();
    tokio::time::timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state:?}, still {:?}", bus.state()))
        .expect("state channel closed");
}

pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Connects `bus` and waits until `client_id` holds `filters` subscriptions on the broker
pub async fn connect_and_settle(bus: &BusConnection, broker: &MemoryBroker, client_id: &str, filters: usize) {
    bus.connect();
    wait_for_state(bus, ConnectionState::Connected).await;
    eventually("broker-side subscriptions", || {
        broker.subscriptions(client_id).len() == filters
    })
    .await;
}
