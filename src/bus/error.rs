use std::time::Duration;

use crate::codec::TopicError;

/// Errors raised by the bus and its transports
///
/// None of these reach the presentation layer as a failure: connection
/// problems drive the reconnect cycle, request problems are logged.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Broker unreachable or the session dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// The initial connect attempt exceeded `connect_timeout`
    #[error("Connect attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Transport refused a subscribe, unsubscribe or publish request
    #[error("Request rejected by transport: {0}")]
    Request(String),

    /// Operation on a connection that was shut down
    #[error("Bus connection is closed")]
    Closed,

    #[error("Invalid topic: {0}")]
    Topic(#[from] TopicError),

    /// Broker URL or connection settings could not be turned into a transport
    #[error("Invalid connection settings: {0}")]
    Config(String),
}
