//! # Telemetry
//!
//! Producing and consuming appliance power readings.
//!
//! ```text
//! telemetry/
//! ├── publisher.rs   - Periodic synthetic readings (hub + simulator)
//! ├── aggregator.rs  - Rolling window + observers for the dashboard
//! └── window.rs      - Fixed-capacity FIFO
//! ```

pub mod aggregator;
pub mod publisher;
pub mod window;

pub use aggregator::{AggregatorUpdate, TelemetryAggregator, TelemetryPoint};
pub use publisher::{PublisherError, PublisherHandle, TelemetryPublisher};
pub use window::RollingWindow;
