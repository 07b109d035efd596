//! # Topic Codec
//!
//! Maps between the bus's raw `(topic, bytes)` pairs and typed envelopes.
//!
//! ```text
//! codec/
//! ├── topic.rs     - TopicPath, TopicFilter, DeviceId and the namespace layout
//! ├── envelope.rs  - Telemetry and command payload schemas, `decode`
//! └── error.rs     - TopicError, DecodeError
//! ```
//!
//! Decoding never guesses: a payload that is not JSON is a
//! [`DecodeError::Parse`], JSON with missing or mistyped fields is a
//! [`DecodeError::Schema`]. Callers log and drop either one.

pub mod envelope;
pub mod error;
pub mod topic;

pub use envelope::{
    decode, now_timestamp, Command, CommandEnvelope, Envelope, PowerKw, TelemetryEnvelope,
    WireEnvelope,
};
pub use error::{DecodeError, TopicError};
pub use topic::{
    encode_control_topic, encode_telemetry_topic, DeviceId, TopicFamily, TopicFilter, TopicPath,
};
