//! # Message Bus
//!
//! Publish/subscribe plumbing shared by every energysync process: the device
//! hub, the telemetry simulator and the dashboard each own exactly one
//! [`BusConnection`] and hand it to the components that need it.
//!
//! ## Module Architecture
//!
//! ```text
//! bus/
//! ├── connection.rs  - Connection state machine, reconnect, subscription replay
//! ├── registry.rs    - Topic filter → handler registry
//! ├── transport.rs   - Transport trait (the broker seam)
//! ├── mqtt.rs        - rumqttc-backed transport (TCP, TLS, WebSocket)
//! ├── memory.rs      - In-process broker for loopback runs and tests
//! ├── message.rs     - Raw inbound message
//! └── error.rs       - BusError
//! ```
//!
//! ## Delivery Model
//!
//! - **At most once**: all traffic uses QoS 0, publishes are fire-and-forget
//! - **One delivery path**: handlers run sequentially on the connection's
//!   driver task, so a blocking handler stalls every topic
//! - **Self-healing**: transport errors lead to `Reconnecting`, never to a
//!   caller-visible failure; subscriptions are replayed after each reconnect
//! - **No buffering**: a publish issued while disconnected is logged and lost

pub mod connection;
pub mod error;
pub mod memory;
pub mod message;
pub mod mqtt;
pub mod registry;
pub mod transport;

pub use connection::{BusConnection, ConnectionState, SubscriptionHandle};
pub use error::BusError;
pub use memory::{MemoryBroker, MemoryTransport};
pub use message::InboundMessage;
pub use mqtt::{BrokerAddress, MqttTransport};
pub use registry::SubscriptionId;
pub use transport::{Transport, TransportEvent};
