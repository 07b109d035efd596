//! Synthetic telemetry source
//!
//! ## Lifecycle
//!
//! ```text
//! Configured ──start()──► Running ──cancel──► Stopped
//! ```
//!
//! While running, one sample is published per interval to
//! `energysync/appliances/<device_id>`. The first sample goes out one full
//! interval after start. Samples due while the bus is down are dropped by the
//! bus, not queued here.

use rand::Rng;
use statum::{machine, state};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::BusConnection;
use crate::codec::{DeviceId, PowerKw, TelemetryEnvelope, TopicError, TopicFamily, TopicPath};
use crate::config::{ConfigError, PublisherSettings};

#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("Invalid publisher settings: {0}")]
    InvalidSettings(#[from] ConfigError),

    #[error("Invalid publisher topic: {0}")]
    Topic(#[from] TopicError),

    #[error("Publisher task failed: {0}")]
    Task(String),
}

#[state]
#[derive(Debug, Clone)]
pub enum PublisherState {
    Configured,
    Running,
    Stopped,
}

#[machine]
#[derive(Debug)]
pub struct TelemetryPublisher<S: PublisherState> {
    bus: BusConnection,
    topic: TopicPath,
    settings: PublisherSettings,
    ticks: u64,
}

impl<S: PublisherState> TelemetryPublisher<S> {
    pub fn topic(&self) -> &TopicPath {
        &self.topic
    }

    pub fn settings(&self) -> &PublisherSettings {
        &self.settings
    }

    /// Samples produced so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl TelemetryPublisher<Configured> {
    pub fn create(bus: BusConnection, settings: PublisherSettings) -> Result<Self, PublisherError> {
        settings.validate()?;
        let device_id = DeviceId::new(settings.device_id.as_str())?;
        let topic = TopicPath::new(TopicFamily::Appliances, device_id);

        debug!("Creating telemetry publisher for {} with {:?}", topic, settings);
        Ok(Self::new(bus, topic, settings, 0))
    }

    pub fn start(self) -> TelemetryPublisher<Running> {
        info!(
            "Telemetry publisher for {} running every {:?}",
            self.topic,
            self.settings.interval()
        );
        self.transition()
    }
}

impl TelemetryPublisher<Running> {
    /// Draws one reading and hands it to the bus
    pub fn publish_sample(&mut self) -> Option<TelemetryEnvelope> {
        let drawn = rand::thread_rng().gen_range(self.settings.min_power_kw..self.settings.max_power_kw);
        self.ticks += 1;

        let power = match PowerKw::new(drawn) {
            Ok(power) => power,
            Err(e) => {
                warn!("Skipping sample {} for {}: {}", self.ticks, self.topic, e);
                return None;
            }
        };

        let envelope = TelemetryEnvelope::now(self.settings.appliance_name.as_str(), power);
        debug!("Sample {} for {}: {} kW", self.ticks, self.topic, power);
        self.bus.publish(&self.topic, &envelope);
        Some(envelope)
    }

    /// Publishes on a fixed cadence until `token` is cancelled
    pub async fn run_until_cancelled(mut self, token: CancellationToken) -> TelemetryPublisher<Stopped> {
        let period = self.settings.interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.publish_sample();
                }
            }
        }

        self.stop()
    }

    pub fn stop(self) -> TelemetryPublisher<Stopped> {
        info!(
            "Telemetry publisher for {} stopped after {} samples",
            self.topic, self.ticks
        );
        self.transition()
    }
}

/// Runs a [`TelemetryPublisher`] on its own task
pub struct PublisherHandle {
    topic: TopicPath,
    token: CancellationToken,
    task: JoinHandle<TelemetryPublisher<Stopped>>,
}

impl PublisherHandle {
    pub fn spawn(bus: BusConnection, settings: PublisherSettings) -> Result<Self, PublisherError> {
        let publisher = TelemetryPublisher::create(bus, settings)?.start();
        let topic = publisher.topic().clone();
        let token = CancellationToken::new();
        let task = tokio::spawn(publisher.run_until_cancelled(token.clone()));

        Ok(Self { topic, token, task })
    }

    pub fn topic(&self) -> &TopicPath {
        &self.topic
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the task and returns the number of samples it produced
    ///
    /// No sample is published after this returns.
    pub async fn stop(self) -> Result<u64, PublisherError> {
        self.token.cancel();
        let stopped = self
            .task
            .await
            .map_err(|e| PublisherError::Task(e.to_string()))?;
        Ok(stopped.ticks())
    }
}
