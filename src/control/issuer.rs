use tracing::info;

use crate::bus::BusConnection;
use crate::codec::{encode_control_topic, Command, CommandEnvelope, DeviceId, TopicError};

/// Publishes user-issued commands
///
/// Fire-and-forget: nothing confirms that a device executed the command, and a
/// command issued while the bus is down is lost.
#[derive(Debug, Clone)]
pub struct CommandIssuer {
    bus: BusConnection,
}

impl CommandIssuer {
    pub fn new(bus: BusConnection) -> Self {
        Self { bus }
    }

    /// Sends `command` to the appliance shown as `display_name`
    ///
    /// "Ceiling Fan" addresses `energysync/control/ceiling_fan`.
    pub fn send(&self, display_name: &str, command: Command) -> Result<CommandEnvelope, TopicError> {
        let device_id = DeviceId::from_display_name(display_name)?;
        Ok(self.send_to(&device_id, command))
    }

    pub fn send_to(&self, device_id: &DeviceId, command: Command) -> CommandEnvelope {
        let envelope = CommandEnvelope::now(command);
        let topic = encode_control_topic(device_id);
        info!("Issuing {} to {}", command, topic);
        self.bus.publish(&topic, &envelope);
        envelope
    }
}
