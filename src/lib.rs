//! # energysync
//!
//! Publish/subscribe messaging for a simulated energy-monitoring deployment:
//! appliances report power readings, users switch appliances on and off.
//!
//! ```text
//! TelemetryPublisher ─┐                         ┌─► TelemetryAggregator ─► observers
//!                     ├─► BusConnection ◄─► broker
//! CommandIssuer ──────┘                         └─► CommandDispatcher ─► CommandExecutor
//! ```
//!
//! Every process owns one [`bus::BusConnection`] and injects it into the
//! components it runs.

pub mod bus;
pub mod codec;
pub mod config;
pub mod control;
pub mod logging;
pub mod telemetry;
