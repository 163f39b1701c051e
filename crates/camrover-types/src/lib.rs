//! `camrover-types` – shared wire records and the relay error taxonomy.
//!
//! Everything that crosses a crate boundary lives here: the inbound
//! [`ControlMessage`] record, its typed [`RoverCommand`] view, the records the
//! relay itself emits ([`RelayRecord`], [`LegacyCommandAck`]) and
//! [`RelayError`].

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Connection identity
// ---------------------------------------------------------------------------

/// Opaque identifier of one open peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The short form is plenty to tell peers apart in logs.
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

/// Milliseconds since the Unix epoch, the timestamp unit used on the wire.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Inbound control records
// ---------------------------------------------------------------------------

/// A structured text record received from a peer.
///
/// The relay enforces no schema beyond "parses as a key/value record"; the
/// original text is kept so the record can be re-broadcast verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    raw: String,
    fields: Map<String, Value>,
}

impl ControlMessage {
    /// Parse `text` as a JSON object.
    ///
    /// Returns `None` for anything that is not an object (invalid JSON,
    /// arrays, bare scalars).
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(fields)) => Some(Self {
                raw: text.to_string(),
                fields,
            }),
            _ => None,
        }
    }

    /// The original text exactly as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Look up an auxiliary field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The command name: `cmd`, falling back to the legacy `command` field.
    pub fn command_name(&self) -> Option<&str> {
        self.fields
            .get("cmd")
            .or_else(|| self.fields.get("command"))
            .and_then(Value::as_str)
    }

    /// `true` when the record only carries the legacy `command` field.
    pub fn is_legacy(&self) -> bool {
        !self.fields.contains_key("cmd") && self.fields.contains_key("command")
    }

    /// Decode the record into a typed [`RoverCommand`].
    ///
    /// Returns `None` for unknown commands, legacy records and values outside
    /// the documented ranges. Such records are still relayed; the typed view
    /// is only used for logging.
    pub fn typed(&self) -> Option<RoverCommand> {
        let command: RoverCommand =
            serde_json::from_value(Value::Object(self.fields.clone())).ok()?;
        command.in_range().then_some(command)
    }
}

/// Drive direction for a `motor` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotorAction {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

/// Camera gimbal axis for a `servo` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServoAxis {
    Pan,
    Tilt,
}

/// Typed view of the commands the console and the rover understand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum RoverCommand {
    Motor {
        action: MotorAction,
        #[serde(default)]
        speed: Option<u8>,
    },
    Servo {
        axis: ServoAxis,
        #[serde(default)]
        angle: Option<u8>,
    },
    Speed {
        value: u8,
    },
    StartAudio,
    StopAudio,
}

impl RoverCommand {
    /// Servo angles are 0–180 degrees, speeds 0–100 percent.
    fn in_range(&self) -> bool {
        match self {
            RoverCommand::Motor { speed, .. } => speed.is_none_or(|s| s <= 100),
            RoverCommand::Servo { angle, .. } => angle.is_none_or(|a| a <= 180),
            RoverCommand::Speed { value } => *value <= 100,
            RoverCommand::StartAudio | RoverCommand::StopAudio => true,
        }
    }

    /// Short label for structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            RoverCommand::Motor { .. } => "motor",
            RoverCommand::Servo { .. } => "servo",
            RoverCommand::Speed { .. } => "speed",
            RoverCommand::StartAudio => "start_audio",
            RoverCommand::StopAudio => "stop_audio",
        }
    }
}

// ---------------------------------------------------------------------------
// Records emitted by the relay
// ---------------------------------------------------------------------------

/// Status carried by an `audio_control` acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioStatus {
    AudioStarted,
    AudioStopped,
}

/// Structured records the relay itself produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayRecord {
    /// Reply to the peer that sent `start_audio` / `stop_audio`.
    AudioControl { status: AudioStatus, timestamp: i64 },
    /// Describes the binary frame that immediately follows it.
    AudioMetadata { seq: u64, size: usize, timestamp: i64 },
}

impl RelayRecord {
    /// Serialise to the JSON text sent on the wire.
    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::Serialization(e.to_string()))
    }
}

/// Reply to a record using the legacy `command` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyCommandAck {
    pub status: String,
    #[serde(rename = "receivedCommand")]
    pub received_command: String,
}

impl LegacyCommandAck {
    pub fn ok(command: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            received_command: command.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::Serialization(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised anywhere in the relay or the video proxy.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("cannot bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("telemetry frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("camera upstream unavailable: {0}")]
    Upstream(String),

    #[error("camera upstream timed out after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("camera upstream answered with status {0}")]
    UpstreamStatus(u16),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
