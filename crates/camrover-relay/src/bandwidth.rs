//! Bandwidth accounting and the periodic throughput reporter.
//!
//! The reporter is a read-only observer: it never influences forwarding.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use camrover_types::ConnectionId;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::registry::ConnectionRegistry;

/// Bytes forwarded by one connection since its last checkpoint.
#[derive(Debug)]
pub struct BandwidthMeter {
    bytes: AtomicU64,
    checkpoint: Mutex<Instant>,
}

/// One drained reporting period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthSample {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl BandwidthSample {
    /// Average throughput over the sample in kilobits per second.
    pub fn kbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.bytes as f64 * 8.0) / 1000.0 / secs
    }
}

impl BandwidthMeter {
    pub fn new() -> Self {
        Self {
            bytes: AtomicU64::new(0),
            checkpoint: Mutex::new(Instant::now()),
        }
    }

    /// Account for one forwarded frame.
    pub fn record(&self, bytes: usize) {
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Bytes accumulated since the last checkpoint.
    pub fn pending(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Drain the accumulator and move the checkpoint to `now`.
    ///
    /// Returns `None` when nothing was forwarded since the last checkpoint.
    /// The checkpoint still moves, so every sample covers one period.
    pub fn take_sample(&self, now: Instant) -> Option<BandwidthSample> {
        let mut checkpoint = self.checkpoint.lock();
        let bytes = self.bytes.swap(0, Ordering::Relaxed);
        let elapsed = now.saturating_duration_since(*checkpoint);
        *checkpoint = now;
        if bytes == 0 {
            return None;
        }
        Some(BandwidthSample { bytes, elapsed })
    }
}

impl Default for BandwidthMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Throughput estimate for one connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthReport {
    pub connection: ConnectionId,
    pub peer: SocketAddr,
    pub sample: BandwidthSample,
}

/// Periodically turns every connection's accumulator into a log event.
#[derive(Debug, Clone)]
pub struct BandwidthReporter {
    registry: ConnectionRegistry,
    period: Duration,
}

impl BandwidthReporter {
    pub fn new(registry: ConnectionRegistry, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Sample every connection with pending bytes and emit one event each.
    pub fn report_once(&self) -> Vec<BandwidthReport> {
        let now = Instant::now();
        let reports: Vec<BandwidthReport> = self
            .registry
            .handles()
            .into_iter()
            .filter_map(|handle| {
                handle.bandwidth.take_sample(now).map(|sample| BandwidthReport {
                    connection: handle.id,
                    peer: handle.addr,
                    sample,
                })
            })
            .collect();

        for report in &reports {
            info!(
                target: "camrover::bandwidth",
                connection = %report.connection,
                peer = %report.peer,
                bytes = report.sample.bytes,
                elapsed_ms = report.sample.elapsed.as_millis() as u64,
                kbps = report.sample.kbps(),
                "telemetry throughput"
            );
        }
        reports
    }

    /// Run forever on the configured period.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.period.max(Duration::from_millis(1)));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.report_once();
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
