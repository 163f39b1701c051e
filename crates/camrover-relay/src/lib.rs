//! `camrover-relay` – The Multiplexing Core
//!
//! Relays control records and audio telemetry between every peer connected
//! to the rover relay (operator consoles and the rover itself) without caring
//! about the transport that carries them.
//!
//! # Modules
//!
//! - [`registry`] – Live connection set with best-effort, non-blocking
//!   broadcast-to-all-except-sender.
//! - [`classifier`] – Tags inbound frames as control, telemetry or malformed
//!   text.
//! - [`session`] – Per-connection `idle` / `streaming` audio state machine.
//! - [`throttle`] – Size limit, minimum frame spacing and sequence numbers
//!   for forwarded telemetry.
//! - [`bandwidth`] – Per-connection byte accounting and the periodic
//!   throughput reporter.
//! - [`relay`] – [`Relay`], which ties the pieces together for one inbound
//!   frame at a time.

pub mod bandwidth;
pub mod classifier;
pub mod registry;
pub mod relay;
pub mod session;
pub mod throttle;

pub use bandwidth::{BandwidthMeter, BandwidthReport, BandwidthReporter, BandwidthSample};
pub use classifier::{Classified, InboundFrame, TelemetryFrame, classify};
pub use registry::{BroadcastReport, ConnectionHandle, ConnectionRegistry, Outbound, Registration};
pub use relay::{Connection, Disposition, Relay, RelayLimits};
pub use session::{AudioCommand, AudioSession, SessionState};
pub use throttle::{StampedFrame, TelemetryThrottle, ThrottleDecision};
