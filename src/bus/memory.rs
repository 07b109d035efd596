//! In-process broker for loopback runs and tests
//!
//! Routes publishes to every attached client with a matching filter, using the
//! same wildcard rules as an MQTT broker. Sessions are always clean: when a
//! client drops or is severed, its subscriptions are forgotten and must be
//! reissued after reconnecting.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::error::BusError;
use super::message::InboundMessage;
use super::transport::{Transport, TransportEvent};
use crate::codec::{TopicFilter, TopicPath};

enum MemoryEvent {
    Deliver(InboundMessage),
    Severed(String),
}

struct Session {
    filters: Vec<TopicFilter>,
    sender: mpsc::UnboundedSender<MemoryEvent>,
}

struct BrokerState {
    available: bool,
    sessions: HashMap<String, Session>,
}

#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                available: true,
                sessions: HashMap::new(),
            })),
        }
    }

    /// A transport that connects to this broker as `client_id`
    pub fn transport(&self, client_id: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
            client_id: client_id.into(),
            receiver: None,
        }
    }

    /// While unavailable, connect attempts are refused
    pub fn set_available(&self, available: bool) {
        info!("Memory broker availability set to {}", available);
        self.state.lock().available = available;
    }

    /// Drops a client's session as if the network failed
    ///
    /// Returns `false` if the client was not attached.
    pub fn sever(&self, client_id: &str) -> bool {
        let session = self.state.lock().sessions.remove(client_id);
        match session {
            Some(session) => {
                debug!("Severing memory session {}", client_id);
                let _ = session
                    .sender
                    .send(MemoryEvent::Severed("connection reset by broker".to_string()));
                true
            }
            None => false,
        }
    }

    /// Routes a message to all matching sessions, returns the delivery count
    ///
    /// Accepts any topic string so malformed or foreign topics can be injected.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        let payload = payload.into();
        let mut state = self.state.lock();
        let mut delivered = 0;

        state.sessions.retain(|client_id, session| {
            if !session.filters.iter().any(|filter| filter.matches(topic)) {
                return true;
            }
            let message = InboundMessage::from_topic(topic, payload.clone());
            match session.sender.send(MemoryEvent::Deliver(message)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!("Dropping stale memory session {}", client_id);
                    false
                }
            }
        });

        delivered
    }

    pub fn is_attached(&self, client_id: &str) -> bool {
        self.state.lock().sessions.contains_key(client_id)
    }

    /// Broker-side subscriptions of one client
    pub fn subscriptions(&self, client_id: &str) -> Vec<TopicFilter> {
        self.state
            .lock()
            .sessions
            .get(client_id)
            .map(|session| session.filters.clone())
            .unwrap_or_default()
    }

    fn attach(
        &self,
        client_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<MemoryEvent>, BusError> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(BusError::Connection("broker unavailable".to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let previous = state.sessions.insert(
            client_id.to_string(),
            Session {
                filters: Vec::new(),
                sender,
            },
        );
        if let Some(previous) = previous {
            let _ = previous
                .sender
                .send(MemoryEvent::Severed("session taken over".to_string()));
        }
        Ok(receiver)
    }

    fn detach(&self, client_id: &str) {
        self.state.lock().sessions.remove(client_id);
    }

    fn with_session<R>(
        &self,
        client_id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, BusError> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(client_id)
            .ok_or_else(|| BusError::Request(format!("{client_id} is not connected")))?;
        Ok(f(session))
    }
}

pub struct MemoryTransport {
    broker: MemoryBroker,
    client_id: String,
    receiver: Option<mpsc::UnboundedReceiver<MemoryEvent>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn next_event(&mut self) -> Result<TransportEvent, BusError> {
        if self.receiver.is_none() {
            self.receiver = Some(self.broker.attach(&self.client_id)?);
            return Ok(TransportEvent::Connected);
        }

        let event = match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => None,
        };

        match event {
            Some(MemoryEvent::Deliver(message)) => Ok(TransportEvent::Message(message)),
            Some(MemoryEvent::Severed(reason)) => {
                self.receiver = None;
                Err(BusError::Connection(reason))
            }
            None => {
                self.receiver = None;
                Err(BusError::Connection("memory broker dropped".to_string()))
            }
        }
    }

    fn subscribe(&mut self, filter: &TopicFilter) -> Result<(), BusError> {
        self.broker.with_session(&self.client_id, |session| {
            if !session.filters.contains(filter) {
                session.filters.push(filter.clone());
            }
        })
    }

    fn unsubscribe(&mut self, filter: &TopicFilter) -> Result<(), BusError> {
        self.broker.with_session(&self.client_id, |session| {
            session.filters.retain(|existing| existing != filter);
        })
    }

    fn publish(&mut self, topic: &TopicPath, payload: Vec<u8>) -> Result<(), BusError> {
        if !self.broker.is_attached(&self.client_id) {
            return Err(BusError::Request(format!(
                "{} is not connected",
                self.client_id
            )));
        }
        self.broker.publish(&topic.to_string(), payload);
        Ok(())
    }

    fn close(&mut self) {
        if self.receiver.take().is_some() {
            self.broker.detach(&self.client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DeviceId;

    fn control_topic(device: &str) -> TopicPath {
        crate::codec::encode_control_topic(&DeviceId::new(device).unwrap())
    }

    #[tokio::test]
    async fn routes_by_filter_and_forgets_on_sever() {
        let broker = MemoryBroker::new();
        let mut hub = broker.transport("hub");

        assert!(matches!(
            hub.next_event().await,
            Ok(TransportEvent::Connected)
        ));
        hub.subscribe(&TopicFilter::all_control()).unwrap();
        assert_eq!(broker.subscriptions("hub"), vec![TopicFilter::all_control()]);

        hub.publish(&control_topic("fan"), b"{}".to_vec()).unwrap();
        match hub.next_event().await {
            Ok(TransportEvent::Message(message)) => {
                assert_eq!(message.topic, "energysync/control/fan")
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(broker.sever("hub"));
        assert!(matches!(
            hub.next_event().await,
            Err(BusError::Connection(_))
        ));
        assert!(hub.subscribe(&TopicFilter::all_control()).is_err());

        // clean session after reconnect
        assert!(matches!(
            hub.next_event().await,
            Ok(TransportEvent::Connected)
        ));
        assert!(broker.subscriptions("hub").is_empty());
        assert_eq!(broker.publish("energysync/control/fan", "{}"), 0);
    }

    #[tokio::test]
    async fn unavailable_broker_refuses_connect() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let mut client = broker.transport("client");

        assert!(matches!(
            client.next_event().await,
            Err(BusError::Connection(_))
        ));
        assert!(!broker.is_attached("client"));

        broker.set_available(true);
        assert!(matches!(
            client.next_event().await,
            Ok(TransportEvent::Connected)
        ));
        client.close();
        assert!(!broker.is_attached("client"));
    }
}
