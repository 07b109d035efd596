//! Error definitions for topic and envelope decoding

use thiserror::Error;

/// Errors raised while building or reading topic strings
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// Topic or filter string was empty
    #[error("Topic is empty")]
    Empty,

    /// A segment is empty or contains a reserved character
    #[error("Invalid topic segment: {0:?}")]
    InvalidSegment(String),

    /// Wildcard used somewhere other than a whole segment (or `#` not last)
    #[error("Misplaced wildcard in filter: {0}")]
    MisplacedWildcard(String),

    /// Topic does not belong to `energysync/{appliances,control}/<id>`
    #[error("Topic outside the energysync namespace: {0}")]
    OutsideNamespace(String),
}

/// Reasons an inbound message could not be turned into an envelope
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not well-formed JSON
    #[error("Parse error: {0}")]
    Parse(String),

    /// Well-formed payload with missing or invalid required fields
    #[error("Schema error: {0}")]
    Schema(String),

    /// Topic could not be mapped to a device
    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),
}

impl DecodeError {
    /// Sorts a `serde_json` failure into parse or schema errors
    pub(crate) fn from_json(error: serde_json::Error) -> Self {
        use serde_json::error::Category;

        match error.classify() {
            Category::Data => DecodeError::Schema(error.to_string()),
            Category::Io | Category::Syntax | Category::Eof => {
                DecodeError::Parse(error.to_string())
            }
        }
    }
}
