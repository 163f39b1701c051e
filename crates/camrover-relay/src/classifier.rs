//! Tags each inbound message as control, telemetry or malformed text.

use bytes::Bytes;
use camrover_types::{ControlMessage, now_millis};

/// A message as it arrived from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Text(String),
    Binary(Bytes),
}

/// One opaque binary payload plus derived metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    payload: Bytes,
    captured_at: i64,
}

impl TelemetryFrame {
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            captured_at: now_millis(),
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Capture time in Unix milliseconds.
    pub fn captured_at(&self) -> i64 {
        self.captured_at
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Classification result. Parse failure is a value, never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Control(ControlMessage),
    RawTelemetry(TelemetryFrame),
    /// Text that is not a key/value record, kept for plain-text forwarding.
    MalformedText(String),
}

/// Classify one inbound frame.
///
/// Binary frames are never inspected; text frames must parse as an object.
pub fn classify(frame: InboundFrame) -> Classified {
    match frame {
        InboundFrame::Binary(payload) => Classified::RawTelemetry(TelemetryFrame::new(payload)),
        InboundFrame::Text(text) => match ControlMessage::parse(&text) {
            Some(message) => Classified::Control(message),
            None => Classified::MalformedText(text),
        },
    }
}
