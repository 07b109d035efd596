//! Live telemetry aggregation for the presentation layer
//!
//! ```text
//! energysync/appliances/+ ──► decode ──► RollingWindow (N=7) ──► observers
//!                               │                                 (window, latest kW, cost)
//!                               └─ failure: dropped
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::window::RollingWindow;
use crate::bus::{BusConnection, BusError, InboundMessage, SubscriptionHandle};
use crate::codec::{self, DeviceId, Envelope, PowerKw, TopicFilter};
use crate::config::AggregatorSettings;

/// One accepted telemetry reading
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPoint {
    pub device_id: DeviceId,
    pub appliance_name: String,
    /// As received, not re-parsed
    pub timestamp: String,
    pub power: PowerKw,
}

/// What observers receive after each accepted reading
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorUpdate {
    /// Window contents, oldest first
    pub window: Vec<TelemetryPoint>,
    pub latest: PowerKw,
    /// `latest` kW priced at the configured tariff
    pub instantaneous_cost: f64,
}

type Observer = Arc<dyn Fn(&AggregatorUpdate) + Send + Sync>;

struct AggregatorState {
    window: Mutex<RollingWindow<TelemetryPoint>>,
    observers: Mutex<Vec<Observer>>,
    tariff_per_kwh: f64,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl AggregatorState {
    fn on_message(&self, message: &InboundMessage) {
        let (device_id, envelope) = match codec::decode(&message.topic, &message.payload) {
            Ok(Envelope::Telemetry {
                device_id,
                envelope,
            }) => (device_id, envelope),
            Ok(other) => {
                debug!("Ignoring non-telemetry envelope for {}", other.device_id());
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                debug!("Dropping telemetry on {}: {}", message.topic, e);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let point = TelemetryPoint {
            device_id,
            appliance_name: envelope.appliance_name,
            timestamp: envelope.timestamp,
            power: envelope.power,
        };
        self.ingest(point);
    }

    fn ingest(&self, point: TelemetryPoint) {
        let latest = point.power;
        let window = {
            let mut window = self.window.lock();
            window.push(point);
            window.snapshot()
        };
        self.accepted.fetch_add(1, Ordering::Relaxed);

        let update = AggregatorUpdate {
            window,
            latest,
            instantaneous_cost: latest.kw() * self.tariff_per_kwh,
        };

        // observers may call back into the aggregator
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer(&update);
        }
    }
}

/// Keeps a rolling window of the latest appliance readings
///
/// Subscribes to `energysync/appliances/+` on construction. Malformed
/// messages are dropped without reaching observers.
pub struct TelemetryAggregator {
    state: Arc<AggregatorState>,
    subscription: SubscriptionHandle,
}

impl TelemetryAggregator {
    pub fn attach(bus: &BusConnection, settings: &AggregatorSettings) -> Result<Self, BusError> {
        let state = Arc::new(AggregatorState {
            window: Mutex::new(RollingWindow::new(settings.window_capacity)),
            observers: Mutex::new(Vec::new()),
            tariff_per_kwh: settings.tariff_per_kwh,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let handler_state = state.clone();
        let subscription = bus.subscribe(TopicFilter::all_telemetry(), move |message| {
            handler_state.on_message(message)
        })?;

        info!(
            "Telemetry aggregator attached (window {}, tariff {}/kWh)",
            settings.window_capacity, settings.tariff_per_kwh
        );
        Ok(Self {
            state,
            subscription,
        })
    }

    /// Registers an observer called after every accepted reading
    pub fn on_update<F>(&self, observer: F)
    where
        F: Fn(&AggregatorUpdate) + Send + Sync + 'static,
    {
        self.state.observers.lock().push(Arc::new(observer));
    }

    /// Window contents, oldest first
    pub fn snapshot(&self) -> Vec<TelemetryPoint> {
        self.state.window.lock().snapshot()
    }

    pub fn latest(&self) -> Option<TelemetryPoint> {
        self.state.window.lock().latest().cloned()
    }

    pub fn accepted(&self) -> u64 {
        self.state.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /// Stops receiving telemetry; the window keeps its last contents
    pub fn detach(&self) -> bool {
        self.subscription.cancel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;

    fn state(capacity: usize) -> AggregatorState {
        AggregatorState {
            window: Mutex::new(RollingWindow::new(NonZeroUsize::new(capacity).unwrap())),
            observers: Mutex::new(Vec::new()),
            tariff_per_kwh: 0.8,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    #[test]
    fn accepted_reading_reaches_observers_with_cost() {
        let state = state(7);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        state
            .observers
            .lock()
            .push(Arc::new(move |update: &AggregatorUpdate| sink.lock().push(update.clone())));

        state.on_message(&InboundMessage::from_topic(
            "energysync/appliances/sim1",
            r#"{"appliance":"X","power":"5.00","timestamp":"T1"}"#,
        ));

        let updates = seen.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].window.len(), 1);
        assert_eq!(updates[0].window[0].timestamp, "T1");
        assert_eq!(updates[0].latest.kw(), 5.0);
        assert!((updates[0].instantaneous_cost - 4.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_readings_are_dropped() {
        let state = state(7);
        for (topic, payload) in [
            ("energysync/appliances/sim1", "not json"),
            ("energysync/appliances/sim1", r#"{"appliance":"X"}"#),
            ("energysync/control/sim1", r#"{"command":"ON","timestamp":"T"}"#),
        ] {
            state.on_message(&InboundMessage::from_topic(topic, payload));
        }
        assert!(state.window.lock().is_empty());
        assert_eq!(state.dropped.load(Ordering::Relaxed), 3);
        assert_eq!(state.accepted.load(Ordering::Relaxed), 0);
    }
}
