//! # Control
//!
//! ```text
//! CommandIssuer ──► energysync/control/<id> ──► CommandDispatcher ──► CommandExecutor
//! ```

pub mod dispatcher;
pub mod issuer;

pub use dispatcher::{CommandDispatcher, CommandExecutor, DeviceCommand, LoggingExecutor};
pub use issuer::CommandIssuer;
