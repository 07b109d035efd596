//! Device-side command handling
//!
//! The dispatcher owns one subscription to `energysync/control/#`. Every
//! message is decoded and either executed or rejected; nothing is retried and
//! no negative acknowledgment goes back to the issuer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::{BusConnection, BusError, InboundMessage, SubscriptionHandle};
use crate::codec::{self, Command, DeviceId, Envelope, TopicFilter};

/// A decoded command addressed to one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    pub device_id: DeviceId,
    pub command: Command,
    pub timestamp: String,
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} @ {}", self.device_id, self.command, self.timestamp)
    }
}

/// Carries out decoded commands
///
/// Execution always succeeds once a command reaches the executor. Any
/// `Fn(&DeviceCommand)` closure is an executor.
pub trait CommandExecutor: Send + Sync + 'static {
    fn execute(&self, command: &DeviceCommand);
}

impl<F> CommandExecutor for F
where
    F: Fn(&DeviceCommand) + Send + Sync + 'static,
{
    fn execute(&self, command: &DeviceCommand) {
        self(command)
    }
}

/// Reports each command to the log the way the device hub prints it
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExecutor;

impl CommandExecutor for LoggingExecutor {
    fn execute(&self, command: &DeviceCommand) {
        info!(
            "COMMAND RECEIVED for {}\n   Action: {}\n   Time:   {}\n   Status: executed successfully",
            command.device_id.display_label(),
            command.command,
            command.timestamp
        );
    }
}

#[derive(Default)]
struct DispatchCounters {
    executed: AtomicU64,
    rejected: AtomicU64,
}

struct DispatchState {
    executor: Box<dyn CommandExecutor>,
    counters: DispatchCounters,
}

impl DispatchState {
    fn on_message(&self, message: &InboundMessage) {
        let command = match codec::decode(&message.topic, &message.payload) {
            Ok(Envelope::Command {
                device_id,
                envelope,
            }) => DeviceCommand {
                device_id,
                command: envelope.command,
                timestamp: envelope.timestamp,
            },
            Ok(other) => {
                warn!("Rejected non-command envelope for {}", other.device_id());
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                warn!("Rejected command on {}: {}", message.topic, e);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        self.executor.execute(&command);
        self.counters.executed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decodes control messages and hands them to a [`CommandExecutor`]
pub struct CommandDispatcher {
    state: Arc<DispatchState>,
    subscription: SubscriptionHandle,
}

impl CommandDispatcher {
    pub fn attach(bus: &BusConnection, executor: impl CommandExecutor) -> Result<Self, BusError> {
        let state = Arc::new(DispatchState {
            executor: Box::new(executor),
            counters: DispatchCounters::default(),
        });

        let handler_state = state.clone();
        let subscription = bus.subscribe(TopicFilter::all_control(), move |message| {
            handler_state.on_message(message)
        })?;

        info!("Command dispatcher listening on {}", subscription.filter());
        Ok(Self {
            state,
            subscription,
        })
    }

    pub fn executed(&self) -> u64 {
        self.state.counters.executed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.state.counters.rejected.load(Ordering::Relaxed)
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_active()
    }

    pub fn detach(&self) -> bool {
        self.subscription.cancel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording_state() -> (DispatchState, Arc<Mutex<Vec<DeviceCommand>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let state = DispatchState {
            executor: Box::new(move |command: &DeviceCommand| sink.lock().push(command.clone())),
            counters: DispatchCounters::default(),
        };
        (state, seen)
    }

    #[test]
    fn executes_decoded_command() {
        let (state, seen) = recording_state();
        state.on_message(&InboundMessage::from_topic(
            "energysync/control/air_conditioner",
            r#"{"command":"ON","timestamp":"T2"}"#,
        ));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].device_id.as_str(), "air_conditioner");
        assert_eq!(seen[0].command, Command::On);
        assert_eq!(seen[0].timestamp, "T2");
        assert_eq!(state.counters.executed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn rejects_without_invoking_executor() {
        let (state, seen) = recording_state();
        for payload in [
            r#"{"timestamp":"T"}"#,
            r#"{"command":"TOGGLE","timestamp":"T"}"#,
            "{oops",
        ] {
            state.on_message(&InboundMessage::from_topic("energysync/control/fan", payload));
        }
        state.on_message(&InboundMessage::from_topic(
            "energysync/appliances/fan",
            r#"{"appliance":"Fan","power":"1.00","timestamp":"T"}"#,
        ));

        assert!(seen.lock().is_empty());
        assert_eq!(state.counters.rejected.load(Ordering::Relaxed), 4);
        assert_eq!(state.counters.executed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn logging_executor_accepts_any_command() {
        let command = DeviceCommand {
            device_id: DeviceId::new("ceiling_fan").unwrap(),
            command: Command::Off,
            timestamp: "T".to_string(),
        };
        LoggingExecutor.execute(&command);
        assert_eq!(command.to_string(), "ceiling_fan -> OFF @ T");
    }
}
