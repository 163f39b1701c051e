//! Per-connection telemetry throttle and sequencer.
//!
//! Audio telemetry is latency-sensitive, so frames arriving faster than the
//! minimum spacing are dropped rather than queued. The spacing window is a
//! GCRA limiter from [`governor`] with a burst of one: after a frame is
//! forwarded the next one is admitted no earlier than `min_interval` later.

use std::num::NonZeroU32;
use std::time::Duration;

use bytes::Bytes;
use camrover_types::{RelayError, RelayRecord};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use crate::classifier::TelemetryFrame;

/// A frame cleared for forwarding, stamped with its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedFrame {
    pub seq: u64,
    pub metadata: RelayRecord,
    pub payload: Bytes,
}

impl StampedFrame {
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// What to do with an admissible-size frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleDecision {
    Forward(StampedFrame),
    /// Arrived inside the spacing window of the previous forwarded frame.
    Throttled,
}

/// Rolling spacing window plus sequence counter for one connection.
pub struct TelemetryThrottle {
    limiter: Option<DefaultDirectRateLimiter>,
    max_frame_bytes: usize,
    next_seq: u64,
}

impl TelemetryThrottle {
    /// A zero `min_interval` disables spacing; the size limit still applies.
    pub fn new(min_interval: Duration, max_frame_bytes: usize) -> Self {
        let limiter = Quota::with_period(min_interval)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        Self {
            limiter,
            max_frame_bytes,
            next_seq: 0,
        }
    }

    /// Decide forward-or-drop for one frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::FrameTooLarge`] when the payload exceeds the
    /// configured maximum. Oversize frames do not consume the spacing window.
    pub fn admit(&mut self, frame: TelemetryFrame) -> Result<ThrottleDecision, RelayError> {
        let size = frame.size();
        if size > self.max_frame_bytes {
            return Err(RelayError::FrameTooLarge {
                size,
                max: self.max_frame_bytes,
            });
        }

        if let Some(limiter) = &self.limiter
            && limiter.check().is_err()
        {
            return Ok(ThrottleDecision::Throttled);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(ThrottleDecision::Forward(StampedFrame {
            seq,
            metadata: RelayRecord::AudioMetadata {
                seq,
                size,
                timestamp: frame.captured_at(),
            },
            payload: frame.payload().clone(),
        }))
    }

    /// The sequence number the next forwarded frame will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

impl std::fmt::Debug for TelemetryThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryThrottle")
            .field("spacing", &self.limiter.is_some())
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field("next_seq", &self.next_seq)
            .finish()
    }
}
