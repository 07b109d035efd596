//! JSON envelopes carried on telemetry and control topics
//!
//! Telemetry: `{"appliance":"Virtual Lab Simulator","power":"6.42","timestamp":"..."}`
//! Command:   `{"command":"ON","timestamp":"..."}`

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::error::DecodeError;
use super::topic::{DeviceId, TopicFamily, TopicPath};

/// Current time as an ISO-8601 UTC string with millisecond precision
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Power draw in kilowatts, held at two-decimal precision
///
/// Always finite and strictly positive. Positive readings below 0.01 kW are
/// held at 0.01 so they survive the two-decimal wire format.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct PowerKw(f64);

impl PowerKw {
    pub const MIN: f64 = 0.01;

    /// From 2^52 up every f64 is a whole number, so rounding is a no-op
    const WHOLE_ABOVE: f64 = 4_503_599_627_370_496.0;

    pub fn new(kw: f64) -> Result<Self, DecodeError> {
        if !kw.is_finite() {
            return Err(DecodeError::Schema(format!("power is not finite: {kw}")));
        }
        if kw <= 0.0 {
            return Err(DecodeError::Schema(format!("power must be positive: {kw}")));
        }
        if kw >= Self::WHOLE_ABOVE {
            return Ok(Self(kw));
        }
        let rounded = (kw * 100.0).round() / 100.0;
        Ok(Self(rounded.max(Self::MIN)))
    }

    pub fn kw(self) -> f64 {
        self.0
    }
}

impl fmt::Display for PowerKw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Wire form of `power`: a decimal string, or a bare number from lenient publishers
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PowerField {
    Text(String),
    Number(f64),
}

impl PowerField {
    fn into_power(self) -> Result<PowerKw, DecodeError> {
        let kw = match self {
            PowerField::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|e| DecodeError::Schema(format!("power {text:?} is not a number: {e}")))?,
            PowerField::Number(kw) => kw,
        };
        PowerKw::new(kw)
    }
}

fn require_timestamp(timestamp: String) -> Result<String, DecodeError> {
    if timestamp.trim().is_empty() {
        return Err(DecodeError::Schema("timestamp is empty".to_string()));
    }
    Ok(timestamp)
}

#[derive(Serialize, Deserialize)]
struct TelemetryWire {
    appliance: String,
    power: PowerField,
    timestamp: String,
}

#[derive(Serialize, Deserialize)]
struct CommandWire {
    command: Command,
    timestamp: String,
}

/// Something that can be put on the bus as a JSON payload
pub trait WireEnvelope {
    fn encode(&self) -> Result<Vec<u8>, serde_json::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEnvelope {
    pub appliance_name: String,
    pub power: PowerKw,
    pub timestamp: String,
}

impl TelemetryEnvelope {
    /// Envelope stamped with the current time
    pub fn now(appliance_name: impl Into<String>, power: PowerKw) -> Self {
        Self {
            appliance_name: appliance_name.into(),
            power,
            timestamp: now_timestamp(),
        }
    }

    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let wire: TelemetryWire = serde_json::from_slice(raw).map_err(DecodeError::from_json)?;
        Ok(Self {
            appliance_name: wire.appliance,
            power: wire.power.into_power()?,
            timestamp: require_timestamp(wire.timestamp)?,
        })
    }
}

impl WireEnvelope for TelemetryEnvelope {
    fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let wire = TelemetryWire {
            appliance: self.appliance_name.clone(),
            power: PowerField::Text(self.power.to_string()),
            timestamp: self.timestamp.clone(),
        };
        serde_json::to_vec(&wire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    On,
    Off,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::On => f.write_str("ON"),
            Command::Off => f.write_str("OFF"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub command: Command,
    pub timestamp: String,
}

impl CommandEnvelope {
    pub fn now(command: Command) -> Self {
        Self {
            command,
            timestamp: now_timestamp(),
        }
    }

    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let wire: CommandWire = serde_json::from_slice(raw).map_err(DecodeError::from_json)?;
        Ok(Self {
            command: wire.command,
            timestamp: require_timestamp(wire.timestamp)?,
        })
    }
}

impl WireEnvelope for CommandEnvelope {
    fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let wire = CommandWire {
            command: self.command,
            timestamp: self.timestamp.clone(),
        };
        serde_json::to_vec(&wire)
    }
}

/// A decoded message, tagged by the topic family it arrived on
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Telemetry {
        device_id: DeviceId,
        envelope: TelemetryEnvelope,
    },
    Command {
        device_id: DeviceId,
        envelope: CommandEnvelope,
    },
}

impl Envelope {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            Envelope::Telemetry { device_id, .. } | Envelope::Command { device_id, .. } => device_id,
        }
    }
}

/// Decodes a raw message; the topic family selects the payload schema
pub fn decode(topic: &str, raw: &[u8]) -> Result<Envelope, DecodeError> {
    let path = TopicPath::parse(topic)?;
    let device_id = path.device_id().clone();

    match path.family() {
        TopicFamily::Appliances => Ok(Envelope::Telemetry {
            device_id,
            envelope: TelemetryEnvelope::decode(raw)?,
        }),
        TopicFamily::Control => Ok(Envelope::Command {
            device_id,
            envelope: CommandEnvelope::decode(raw)?,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::topic::{encode_control_topic, encode_telemetry_topic};

    fn telemetry(appliance: &str, kw: f64, timestamp: &str) -> TelemetryEnvelope {
        TelemetryEnvelope {
            appliance_name: appliance.to_string(),
            power: PowerKw::new(kw).unwrap(),
            timestamp: timestamp.to_string(),
        }
    }

    #[test]
    fn telemetry_encodes_power_as_two_decimal_string() {
        let envelope = telemetry("Virtual Lab Simulator", 6.4, "2024-01-01T00:00:00.000Z");
        let json = String::from_utf8(envelope.encode().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"appliance":"Virtual Lab Simulator","power":"6.40","timestamp":"2024-01-01T00:00:00.000Z"}"#
        );
    }

    #[test]
    fn telemetry_round_trips_through_topic_and_payload() {
        let device = DeviceId::new("sim1").unwrap();
        for kw in [3.5, 6.42, 9.49, 0.01, 1234.56] {
            let envelope = telemetry("Lab", kw, "2024-01-01T00:00:00.000Z");
            let topic = encode_telemetry_topic(&device).to_string();

            let decoded = decode(&topic, &envelope.encode().unwrap()).unwrap();
            assert_eq!(
                decoded,
                Envelope::Telemetry {
                    device_id: device.clone(),
                    envelope,
                }
            );
        }
    }

    #[test]
    fn telemetry_accepts_numeric_power() {
        let envelope =
            TelemetryEnvelope::decode(br#"{"appliance":"X","power":5,"timestamp":"T1"}"#).unwrap();
        assert_eq!(envelope.power.kw(), 5.0);
        assert_eq!(envelope.timestamp, "T1");
    }

    #[test]
    fn invalid_power_is_a_schema_error() {
        for payload in [
            r#"{"appliance":"X","power":"abc","timestamp":"T"}"#,
            r#"{"appliance":"X","power":"0.00","timestamp":"T"}"#,
            r#"{"appliance":"X","power":"-1.5","timestamp":"T"}"#,
            r#"{"appliance":"X","power":"NaN","timestamp":"T"}"#,
            r#"{"appliance":"X","power":"inf","timestamp":"T"}"#,
            r#"{"appliance":"X","power":"1e309","timestamp":"T"}"#,
            r#"{"appliance":"X","power":true,"timestamp":"T"}"#,
        ] {
            assert!(
                matches!(
                    TelemetryEnvelope::decode(payload.as_bytes()),
                    Err(DecodeError::Schema(_))
                ),
                "{payload}"
            );
        }
    }

    #[test]
    fn huge_power_stays_finite_and_round_trips() {
        let topic = "energysync/appliances/sim1";
        let decoded =
            decode(topic, br#"{"appliance":"X","power":"1e307","timestamp":"T"}"#).unwrap();
        let Envelope::Telemetry { envelope, .. } = decoded else {
            panic!("expected telemetry");
        };
        assert!(envelope.power.kw().is_finite());
        assert_eq!(envelope.power.kw(), 1e307);

        let again = decode(topic, &envelope.encode().unwrap()).unwrap();
        assert!(matches!(again, Envelope::Telemetry { envelope: e, .. } if e == envelope));
    }

    #[test]
    fn tiny_positive_power_is_held_at_minimum() {
        assert_eq!(PowerKw::new(0.004).unwrap().kw(), PowerKw::MIN);
        assert_eq!(PowerKw::new(1e-300).unwrap().kw(), PowerKw::MIN);

        let envelope =
            TelemetryEnvelope::decode(br#"{"appliance":"X","power":"0.004","timestamp":"T"}"#)
                .unwrap();
        assert_eq!(envelope.power.to_string(), "0.01");
        let reencoded = TelemetryEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(reencoded, envelope);
    }

    #[test]
    fn missing_timestamp_is_a_schema_error() {
        let result = TelemetryEnvelope::decode(br#"{"appliance":"X","power":"5.00"}"#);
        assert!(matches!(result, Err(DecodeError::Schema(_))));

        let result = CommandEnvelope::decode(br#"{"command":"ON","timestamp":""}"#);
        assert!(matches!(result, Err(DecodeError::Schema(_))));
    }

    #[test]
    fn command_decodes_from_control_topic() {
        let device = DeviceId::new("air_conditioner").unwrap();
        let topic = encode_control_topic(&device).to_string();

        let decoded = decode(&topic, br#"{"command":"ON","timestamp":"T2"}"#).unwrap();
        assert_eq!(
            decoded,
            Envelope::Command {
                device_id: device,
                envelope: CommandEnvelope {
                    command: Command::On,
                    timestamp: "T2".to_string(),
                },
            }
        );
    }

    #[test]
    fn command_without_command_field_is_a_schema_error() {
        let result = decode("energysync/control/fan", br#"{"timestamp":"T2"}"#);
        assert!(matches!(result, Err(DecodeError::Schema(_))));

        let result = decode("energysync/control/fan", br#"{"command":"TOGGLE","timestamp":"T2"}"#);
        assert!(matches!(result, Err(DecodeError::Schema(_))));

        let result = decode("energysync/control/fan", b"[1,2,3]");
        assert!(matches!(result, Err(DecodeError::Schema(_))));
    }

    #[test]
    fn unstructured_text_is_a_parse_error() {
        for raw in [&b"hello"[..], b"{\"command\":", b"", b"\xff\xfe"] {
            assert!(
                matches!(
                    decode("energysync/control/fan", raw),
                    Err(DecodeError::Parse(_))
                ),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn foreign_topic_is_a_topic_error() {
        let result = decode("elsewhere/control/fan", br#"{"command":"ON","timestamp":"T"}"#);
        assert!(matches!(result, Err(DecodeError::Topic(_))));
    }

    #[test]
    fn command_encodes_upper_case() {
        let envelope = CommandEnvelope {
            command: Command::Off,
            timestamp: "T3".to_string(),
        };
        assert_eq!(
            String::from_utf8(envelope.encode().unwrap()).unwrap(),
            r#"{"command":"OFF","timestamp":"T3"}"#
        );
    }

    #[test]
    fn now_timestamp_is_iso_8601_utc() {
        let timestamp = now_timestamp();
        assert!(chrono::DateTime::parse_from_rfc3339(&timestamp).is_ok());
        assert!(timestamp.ends_with('Z'));
    }
}
