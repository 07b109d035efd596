//! Seam between the connection state machine and a concrete broker session

use async_trait::async_trait;

use super::error::BusError;
use super::message::InboundMessage;
use crate::codec::{TopicFilter, TopicPath};

/// What a transport observed while being driven
#[derive(Debug)]
pub enum TransportEvent {
    /// Session (re)established with the broker
    Connected,
    /// A publish arrived on a subscribed topic
    Message(InboundMessage),
    /// Protocol traffic with no meaning for subscribers (acks, pings)
    Idle,
}

/// A broker session the bus driver can poll and issue requests on
///
/// `next_event` drives the session: after it returned an error, the next call
/// attempts to reconnect. Requests are non-blocking and fire-and-forget; an
/// `Ok` only means the transport accepted the request.
#[async_trait]
pub trait Transport: Send {
    async fn next_event(&mut self) -> Result<TransportEvent, BusError>;

    fn subscribe(&mut self, filter: &TopicFilter) -> Result<(), BusError>;

    fn unsubscribe(&mut self, filter: &TopicFilter) -> Result<(), BusError>;

    /// Best-effort, at-most-once publish
    fn publish(&mut self, topic: &TopicPath, payload: Vec<u8>) -> Result<(), BusError>;

    /// Release the session. Must be safe to call more than once.
    fn close(&mut self);
}
