//! Bus connection with automatic reconnect and subscription replay
//!
//! One [`BusConnection`] owns one broker session. The session is driven by a
//! single tokio task (the driver), which is also the one delivery path for
//! every subscription handler.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──ConnAck──► Connected
//!                                 ▲                       │
//!                                 │ reconnect delay       │ transport error
//!                                 │                       ▼
//!                                 └─────────────── Reconnecting
//!
//! any state ──disconnect()──► Disconnected (terminal)
//! ```
//!
//! # Architecture
//!
//! ```text
//! BusConnection (clonable handle)
//!   │  subscribe / unsubscribe ──► SubscriptionRegistry ◄── replay on Connected
//!   │  publish ─────────────────► request channel ───┐
//!   ▼                                                ▼
//! watch<ConnectionState> ◄──────────────────────  Driver task ◄──► Transport
//!                                                    │
//!                                                    └──► handlers (sequential)
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::BusError;
use super::message::InboundMessage;
use super::mqtt::MqttTransport;
use super::registry::{Handler, SubscriptionId, SubscriptionRegistry};
use super::transport::{Transport, TransportEvent};
use crate::codec::{TopicFilter, TopicPath, WireEnvelope};
use crate::config::ConnectionConfig;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug)]
enum BusRequest {
    Subscribe(TopicFilter),
    Unsubscribe(TopicFilter),
    Publish { topic: TopicPath, payload: Vec<u8> },
}

/// Transport and request queue waiting for `connect()`
struct Pending {
    transport: Box<dyn Transport>,
    requests: mpsc::UnboundedReceiver<BusRequest>,
}

struct Shared {
    config: ConnectionConfig,
    registry: Mutex<SubscriptionRegistry>,
    requests: mpsc::UnboundedSender<BusRequest>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    pending: Mutex<Option<Pending>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!("Bus connection state: {:?} -> {:?}", previous, next);
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn send_request(&self, request: BusRequest) {
        if let Err(e) = self.requests.send(request) {
            warn!("Bus request dropped, driver gone: {:?}", e.0);
        }
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let released = {
            let mut registry = self.registry.lock();
            if !registry.contains(id) {
                return false;
            }
            registry.remove(id)
        };
        debug!("Subscription {:?} cancelled", id);
        if let Some(filter) = released {
            self.send_request(BusRequest::Unsubscribe(filter));
        }
        true
    }
}

/// Handle for one broker connection
///
/// Cheap to clone; all clones share the same session, registry and state.
/// The connection is passed explicitly to publishers, dispatchers and
/// aggregators.
///
/// Dropping every handle does not stop a started connection. Call
/// [`BusConnection::disconnect`] to shut it down.
///
/// # Examples
///
/// ```rust,no_run
/// use energysync::bus::{BusConnection, MemoryBroker};
/// use energysync::codec::TopicFilter;
/// use energysync::config::ConnectionConfig;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = MemoryBroker::new();
/// let bus = BusConnection::new(ConnectionConfig::default(), broker.transport("dashboard"));
///
/// let _subscription = bus.subscribe(TopicFilter::all_telemetry(), |message| {
///     println!("{message}");
/// })?;
/// bus.connect();
/// # bus.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BusConnection {
    shared: Arc<Shared>,
}

impl fmt::Debug for BusConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusConnection")
            .field("broker_url", &self.shared.config.broker_url)
            .field("state", &self.state())
            .field("subscriptions", &self.shared.registry.lock().len())
            .finish()
    }
}

impl BusConnection {
    /// Creates a connection in `Disconnected`; nothing happens until `connect()`
    pub fn new(config: ConnectionConfig, transport: impl Transport + 'static) -> Self {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            shared: Arc::new(Shared {
                config,
                registry: Mutex::new(SubscriptionRegistry::default()),
                requests,
                state,
                shutdown: CancellationToken::new(),
                pending: Mutex::new(Some(Pending {
                    transport: Box::new(transport),
                    requests: request_rx,
                })),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Connection to the MQTT broker named in `config`
    ///
    /// `role` prefixes the generated client id when none is configured.
    pub fn mqtt(config: ConnectionConfig, role: &str) -> Result<Self, BusError> {
        let client_id = config.resolved_client_id(role);
        let transport = MqttTransport::new(&config, &client_id)?;
        info!(
            "MQTT bus prepared for {} (client id {})",
            config.broker_url, client_id
        );
        Ok(Self::new(config, transport))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.current_state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// True after `disconnect()` or after reconnect attempts ran out
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Number of registered subscriptions
    pub fn subscription_count(&self) -> usize {
        self.shared.registry.lock().len()
    }

    /// Starts the connection state machine
    ///
    /// Idempotent while connecting or connected. Connect failures never reach
    /// the caller; they move the connection into `Reconnecting`. Must be called
    /// from within a tokio runtime.
    pub fn connect(&self) {
        if self.is_closed() {
            warn!("connect() called on a closed bus connection, ignoring");
            return;
        }

        let pending = self.shared.pending.lock().take();
        let Some(pending) = pending else {
            debug!("Bus connection already started");
            return;
        };

        info!("Starting bus connection to {}", self.shared.config.broker_url);
        self.shared.set_state(ConnectionState::Connecting);

        let driver = Driver {
            shared: self.shared.clone(),
            transport: pending.transport,
            requests: pending.requests,
        };
        let handle = tokio::spawn(driver.run());
        *self.shared.driver.lock() = Some(handle);
    }

    /// Registers `handler` for every message whose topic matches `filter`
    ///
    /// Takes effect at once when connected, otherwise on the next successful
    /// connect. The subscription is replayed after every reconnect. Safe to
    /// call from inside a handler.
    pub fn subscribe<F>(&self, filter: TopicFilter, handler: F) -> Result<SubscriptionHandle, BusError>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let handler: Handler = Arc::new(handler);
        let id = self.shared.registry.lock().insert(filter.clone(), handler);
        debug!("Subscription {:?} registered for {}", id, filter);
        self.shared.send_request(BusRequest::Subscribe(filter.clone()));

        Ok(SubscriptionHandle {
            id,
            filter,
            bus: Arc::downgrade(&self.shared),
        })
    }

    /// Removes a subscription; returns `false` if it was already gone
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.shared.unsubscribe(handle.id)
    }

    /// Serializes `envelope` and sends it with at-most-once delivery
    ///
    /// Fire-and-forget: while not `Connected` the message is logged and
    /// dropped, never buffered for later.
    pub fn publish<E: WireEnvelope + ?Sized>(&self, topic: &TopicPath, envelope: &E) {
        match envelope.encode() {
            Ok(payload) => self.publish_raw(topic, payload),
            Err(e) => error!("Failed to encode envelope for {}: {}", topic, e),
        }
    }

    /// Sends a payload as-is
    pub fn publish_raw(&self, topic: &TopicPath, payload: Vec<u8>) {
        let state = self.state();
        if state != ConnectionState::Connected {
            warn!("Dropping publish to {} while {:?}", topic, state);
            return;
        }
        self.shared.send_request(BusRequest::Publish {
            topic: topic.clone(),
            payload,
        });
    }

    /// Shuts the connection down for good
    ///
    /// Cancels any pending reconnect timer, releases the transport, forgets all
    /// subscriptions and leaves the state at terminal `Disconnected`.
    pub async fn disconnect(&self) {
        info!("Disconnecting bus from {}", self.shared.config.broker_url);
        self.shared.shutdown.cancel();

        let pending = self.shared.pending.lock().take();
        if let Some(mut pending) = pending {
            pending.transport.close();
        }

        let driver = self.shared.driver.lock().take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                error!("Bus driver task failed: {}", e);
            }
        }

        self.shared.registry.lock().clear();
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

/// Cancellable reference to one subscription
///
/// Dropping the handle keeps the subscription active; call
/// [`SubscriptionHandle::cancel`] to remove it.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    filter: TopicFilter,
    bus: Weak<Shared>,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("broker_url", &self.config.broker_url)
            .finish_non_exhaustive()
    }
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    pub fn is_active(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|shared| shared.registry.lock().contains(self.id))
    }

    /// Removes the subscription; returns `false` if it was already gone
    pub fn cancel(&self) -> bool {
        match self.bus.upgrade() {
            Some(shared) => shared.unsubscribe(self.id),
            None => false,
        }
    }
}

struct Driver {
    shared: Arc<Shared>,
    transport: Box<dyn Transport>,
    requests: mpsc::UnboundedReceiver<BusRequest>,
}

impl Driver {
    async fn run(mut self) {
        let shutdown = self.shared.shutdown.clone();
        let reconnect_delay = self.shared.config.reconnect_delay();
        let connect_timeout = self.shared.config.connect_timeout();
        let max_attempts = self.shared.config.max_reconnect_attempts;

        // Only the very first connect attempt is bounded
        let mut connect_deadline = Some(Instant::now() + connect_timeout);
        let mut failures: u32 = 0;

        loop {
            let event = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(request) = self.requests.recv() => {
                    self.handle_request(request);
                    continue;
                }
                event = next_event(self.transport.as_mut(), connect_deadline, connect_timeout) => event,
            };

            match event {
                Ok(TransportEvent::Connected) => {
                    connect_deadline = None;
                    failures = 0;
                    self.shared.set_state(ConnectionState::Connected);
                    self.resubscribe();
                }
                Ok(TransportEvent::Message(message)) => self.deliver(&message),
                Ok(TransportEvent::Idle) => {}
                Err(e) => {
                    connect_deadline = None;
                    failures = failures.saturating_add(1);
                    warn!("Bus connection error: {}", e);

                    if let Some(max) = max_attempts {
                        if failures > max {
                            error!(
                                "Giving up after {} failed reconnect attempts",
                                failures - 1
                            );
                            break;
                        }
                    }

                    self.shared.set_state(ConnectionState::Reconnecting);
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(reconnect_delay) => {}
                    }
                    self.shared.set_state(ConnectionState::Connecting);
                }
            }
        }

        self.finish();
    }

    fn handle_request(&mut self, request: BusRequest) {
        let connected = self.shared.current_state() == ConnectionState::Connected;

        match request {
            BusRequest::Subscribe(filter) => {
                if !connected {
                    debug!("Subscribe to {} deferred until connected", filter);
                    return;
                }
                if !self.shared.registry.lock().filters().contains(&filter) {
                    debug!("Subscribe to {} skipped, already cancelled", filter);
                    return;
                }
                match self.transport.subscribe(&filter) {
                    Ok(()) => info!("Subscribed to {}", filter),
                    Err(e) => warn!("Subscribe to {} failed: {}", filter, e),
                }
            }
            BusRequest::Unsubscribe(filter) => {
                if !connected || self.shared.registry.lock().filters().contains(&filter) {
                    return;
                }
                match self.transport.unsubscribe(&filter) {
                    Ok(()) => info!("Unsubscribed from {}", filter),
                    Err(e) => warn!("Unsubscribe from {} failed: {}", filter, e),
                }
            }
            BusRequest::Publish { topic, payload } => {
                if !connected {
                    warn!("Dropping publish to {}, connection lost", topic);
                    return;
                }
                match self.transport.publish(&topic, payload) {
                    Ok(()) => debug!("Published to {}", topic),
                    Err(e) => warn!("Publish to {} failed: {}", topic, e),
                }
            }
        }
    }

    /// Reissues every registered filter after a (re)connect
    fn resubscribe(&mut self) {
        let filters = self.shared.registry.lock().filters();
        if filters.is_empty() {
            return;
        }

        let mut restored = 0;
        for filter in &filters {
            match self.transport.subscribe(filter) {
                Ok(()) => restored += 1,
                Err(e) => warn!("Resubscribe to {} failed: {}", filter, e),
            }
        }
        info!("Restored {}/{} subscriptions", restored, filters.len());
    }

    /// Runs matching handlers one after another on this task
    fn deliver(&self, message: &InboundMessage) {
        let handlers = self.shared.registry.lock().matching(&message.topic);
        if handlers.is_empty() {
            debug!("No subscriber for {}", message.topic);
            return;
        }

        for (id, handler) in handlers {
            // a previous handler may have cancelled this one
            if !self.shared.registry.lock().contains(id) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                error!(
                    "Handler for subscription {:?} panicked on {}",
                    id, message.topic
                );
            }
        }
    }

    fn finish(mut self) {
        self.transport.close();
        self.shared.shutdown.cancel();
        self.shared.registry.lock().clear();
        self.shared.set_state(ConnectionState::Disconnected);
        info!("Bus driver stopped");
    }
}

async fn next_event(
    transport: &mut dyn Transport,
    deadline: Option<Instant>,
    limit: std::time::Duration,
) -> Result<TransportEvent, BusError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, transport.next_event())
            .await
            .unwrap_or(Err(BusError::ConnectTimeout(limit))),
        None => transport.next_event().await,
    }
}
