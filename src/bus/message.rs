use chrono::{DateTime, Local};
use std::fmt;

const PREVIEW_CHARS: usize = 32;

/// A raw message as delivered by the broker, before any decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }

    /// Payload as text, lossy for non UTF-8 bytes
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = self.payload_text();
        let preview: String = text.chars().take(PREVIEW_CHARS).collect();
        let ellipsis = if text.chars().count() > PREVIEW_CHARS {
            "…"
        } else {
            ""
        };
        write!(
            f,
            "{} {} - {}{}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            preview,
            ellipsis
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_truncates_long_payloads() {
        let message = InboundMessage::from_topic("energysync/control/fan", "x".repeat(100));
        let rendered = message.to_string();
        assert!(rendered.contains("energysync/control/fan"));
        assert!(rendered.ends_with('…'));

        let short = InboundMessage::from_topic("t", "ok");
        assert!(short.to_string().ends_with("t - ok"));
    }
}
