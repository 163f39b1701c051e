//! [`AudioSession`] – per-connection audio streaming state.
//!
//! ```text
//!            start_audio                 start_audio (re-ack)
//!   ┌──────┐ ───────────► ┌───────────┐ ◄──┐
//!   │ idle │              │ streaming │ ───┘
//!   └──────┘ ◄─────────── └───────────┘
//!      ▲      stop_audio
//!      └─ stop_audio (no-op), disconnect from any state
//! ```
//!
//! Binary frames are only accepted from a peer whose session is
//! `streaming`.

use camrover_types::{AudioStatus, ControlMessage};

/// Audio session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Streaming,
}

/// An audio control command extracted from a [`ControlMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCommand {
    Start,
    Stop,
}

impl AudioCommand {
    /// Recognise `start_audio` / `stop_audio` in either the `cmd` or the
    /// legacy `command` field.
    pub fn from_message(message: &ControlMessage) -> Option<Self> {
        match message.command_name()? {
            "start_audio" => Some(AudioCommand::Start),
            "stop_audio" => Some(AudioCommand::Stop),
            _ => None,
        }
    }
}

/// Result of applying a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    /// Status to acknowledge back to the initiating peer.
    pub ack: AudioStatus,
}

impl Transition {
    /// `false` for the idempotent re-start / re-stop cases.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Per-connection audio state machine. Starts `idle`.
#[derive(Debug, Default)]
pub struct AudioSession {
    state: SessionState,
}

impl AudioSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether binary frames from this peer may be forwarded.
    pub fn accepts_telemetry(&self) -> bool {
        self.state == SessionState::Streaming
    }

    /// Apply a start/stop command. Always yields an acknowledgment, even
    /// when the state does not change.
    pub fn apply(&mut self, command: AudioCommand) -> Transition {
        let from = self.state;
        let (to, ack) = match command {
            AudioCommand::Start => (SessionState::Streaming, AudioStatus::AudioStarted),
            AudioCommand::Stop => (SessionState::Idle, AudioStatus::AudioStopped),
        };
        self.state = to;
        Transition { from, to, ack }
    }

    /// Disconnect or transport error: back to `idle` with no acknowledgment.
    pub fn force_idle(&mut self) {
        self.state = SessionState::Idle;
    }
}
