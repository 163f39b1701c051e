//! [`Relay`] – routes one peer's inbound frames to the rest of the peers.
//!
//! A [`Connection`] holds all per-peer state (audio session, throttle,
//! sequence counter) and is owned by the single task handling that peer's
//! inbound events, so none of it needs locking. The only shared state is the
//! [`ConnectionRegistry`].

use std::net::SocketAddr;
use std::time::Duration;

use camrover_types::{
    AudioStatus, ConnectionId, ControlMessage, LegacyCommandAck, RelayError, RelayRecord,
    now_millis,
};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::classifier::{Classified, InboundFrame, TelemetryFrame, classify};
use crate::registry::{ConnectionHandle, ConnectionRegistry, Outbound};
use crate::session::{AudioCommand, AudioSession, SessionState};
use crate::throttle::{TelemetryThrottle, ThrottleDecision};

/// Default outbound queue depth per peer.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;
/// Default maximum telemetry payload (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;
/// Default minimum spacing between forwarded frames of one peer.
pub const DEFAULT_MIN_FRAME_INTERVAL: Duration = Duration::from_millis(50);

const TRANSPORT_LIMIT_FACTOR: usize = 4;
const MIN_TRANSPORT_MESSAGE_BYTES: usize = 64 * 1024;

/// Tunables for the relay core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayLimits {
    pub max_frame_bytes: usize,
    pub min_frame_interval: Duration,
    pub outbound_queue: usize,
}

impl RelayLimits {
    pub fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    pub fn with_min_frame_interval(mut self, interval: Duration) -> Self {
        self.min_frame_interval = interval;
        self
    }

    pub fn with_outbound_queue(mut self, depth: usize) -> Self {
        self.outbound_queue = depth;
        self
    }

    /// Largest message the transport will buffer at all. Frames between
    /// `max_frame_bytes` and this ceiling are dropped by the relay and the
    /// peer stays connected; anything larger is a transport fault.
    pub fn transport_message_limit(&self) -> usize {
        self.max_frame_bytes
            .saturating_mul(TRANSPORT_LIMIT_FACTOR)
            .max(MIN_TRANSPORT_MESSAGE_BYTES)
    }
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            min_frame_interval: DEFAULT_MIN_FRAME_INTERVAL,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

/// Per-peer state, created on handshake and dropped on disconnect.
#[derive(Debug)]
pub struct Connection {
    handle: ConnectionHandle,
    session: AudioSession,
    throttle: TelemetryThrottle,
    closed: bool,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.addr
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }
}

/// What the relay did with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Control record broadcast verbatim.
    Relayed { delivered: usize },
    /// Legacy `command` record broadcast, sender acknowledged.
    RelayedLegacy { delivered: usize },
    /// Unstructured text broadcast as-is.
    PlainText { delivered: usize },
    /// Audio command applied and acknowledged to the sender only.
    Acknowledged(AudioStatus),
    /// Telemetry frame stamped and broadcast.
    Forwarded { seq: u64, delivered: usize },
    /// Telemetry from a peer whose session is idle.
    DroppedIdle,
    /// Telemetry inside the spacing window.
    Throttled,
    /// Telemetry over the size limit.
    Oversize { size: usize },
    /// The connection was already closed.
    Ignored,
}

/// The relay core. Clone it cheaply – clones share the registry.
#[derive(Debug, Clone)]
pub struct Relay {
    registry: ConnectionRegistry,
    limits: RelayLimits,
}

impl Relay {
    pub fn new(limits: RelayLimits) -> Self {
        Self {
            registry: ConnectionRegistry::new(limits.outbound_queue),
            limits,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn limits(&self) -> &RelayLimits {
        &self.limits
    }

    /// Register a new peer. The receiver must be drained by whoever owns
    /// the peer's socket.
    pub fn open(&self, addr: SocketAddr) -> (Connection, mpsc::Receiver<Outbound>) {
        let registration = self.registry.register(addr);
        let connection = Connection {
            handle: registration.handle,
            session: AudioSession::new(),
            throttle: TelemetryThrottle::new(
                self.limits.min_frame_interval,
                self.limits.max_frame_bytes,
            ),
            closed: false,
        };
        info!(connection = %connection.id(), peer = %addr, peers = self.registry.len(), "peer connected");
        (connection, registration.outbound)
    }

    /// Tear a peer down. Safe to call from both the close and the error
    /// path; only the first call has an effect.
    pub fn close(&self, connection: &mut Connection) -> bool {
        if connection.closed {
            return false;
        }
        connection.closed = true;
        connection.session.force_idle();
        self.registry.unregister(connection.id());
        info!(
            connection = %connection.id(),
            peer = %connection.addr(),
            peers = self.registry.len(),
            "peer disconnected"
        );
        true
    }

    /// Process one inbound frame from `connection`.
    ///
    /// Frames of a single connection must be handed in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Serialization`] if an outgoing record cannot be
    /// encoded. Policy drops are reported through [`Disposition`].
    pub fn handle(
        &self,
        connection: &mut Connection,
        frame: InboundFrame,
    ) -> Result<Disposition, RelayError> {
        if connection.closed {
            return Ok(Disposition::Ignored);
        }
        match classify(frame) {
            Classified::Control(message) => self.handle_control(connection, message),
            Classified::MalformedText(text) => {
                debug!(connection = %connection.id(), "unstructured text, forwarding as plain text");
                let report = self
                    .registry
                    .broadcast_except(connection.id(), &Outbound::Text(text));
                Ok(Disposition::PlainText {
                    delivered: report.delivered,
                })
            }
            Classified::RawTelemetry(frame) => self.handle_telemetry(connection, frame),
        }
    }

    fn handle_control(
        &self,
        connection: &mut Connection,
        message: ControlMessage,
    ) -> Result<Disposition, RelayError> {
        if let Some(command) = AudioCommand::from_message(&message) {
            let transition = connection.session.apply(command);
            if transition.changed() {
                info!(
                    connection = %connection.id(),
                    from = ?transition.from,
                    to = ?transition.to,
                    "audio session transition"
                );
            }
            let ack = RelayRecord::AudioControl {
                status: transition.ack,
                timestamp: now_millis(),
            }
            .to_json()?;
            self.registry.send_to(connection.id(), Outbound::Text(ack));
            return Ok(Disposition::Acknowledged(transition.ack));
        }

        match message.typed() {
            Some(command) => {
                debug!(connection = %connection.id(), cmd = command.label(), "control record")
            }
            None => debug!(
                connection = %connection.id(),
                cmd = message.command_name().unwrap_or("<none>"),
                "unrecognised control record"
            ),
        }

        let report = self
            .registry
            .broadcast_except(connection.id(), &Outbound::Text(message.raw().to_string()));

        if message.is_legacy()
            && let Some(command) = message.command_name()
        {
            let ack = LegacyCommandAck::ok(command).to_json()?;
            self.registry.send_to(connection.id(), Outbound::Text(ack));
            return Ok(Disposition::RelayedLegacy {
                delivered: report.delivered,
            });
        }

        Ok(Disposition::Relayed {
            delivered: report.delivered,
        })
    }

    fn handle_telemetry(
        &self,
        connection: &mut Connection,
        frame: TelemetryFrame,
    ) -> Result<Disposition, RelayError> {
        if !connection.session.accepts_telemetry() {
            trace!(connection = %connection.id(), size = frame.size(), "telemetry while idle, dropped");
            return Ok(Disposition::DroppedIdle);
        }

        let stamped = match connection.throttle.admit(frame) {
            Ok(ThrottleDecision::Forward(stamped)) => stamped,
            Ok(ThrottleDecision::Throttled) => {
                trace!(connection = %connection.id(), "telemetry throttled");
                return Ok(Disposition::Throttled);
            }
            Err(RelayError::FrameTooLarge { size, max }) => {
                warn!(connection = %connection.id(), size, max, "oversize telemetry frame dropped");
                return Ok(Disposition::Oversize { size });
            }
            Err(e) => return Err(e),
        };

        let item = Outbound::Telemetry {
            metadata: stamped.metadata.to_json()?,
            payload: stamped.payload.clone(),
        };
        let report = self.registry.broadcast_except(connection.id(), &item);
        connection.handle.bandwidth.record(stamped.size());
        trace!(
            connection = %connection.id(),
            seq = stamped.seq,
            size = stamped.size(),
            delivered = report.delivered,
            "telemetry forwarded"
        );
        Ok(Disposition::Forwarded {
            seq: stamped.seq,
            delivered: report.delivered,
        })
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RelayLimits::default())
    }
}
