//! Live set of open peer connections with best-effort fan-out.
//!
//! Every peer is represented by a bounded outbound queue drained by the
//! transport task that owns the socket. Broadcasting never awaits: a full
//! queue means the recipient is slow and the item is dropped for that
//! recipient only, so one stalled consumer cannot stall the producers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use camrover_types::ConnectionId;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::bandwidth::BandwidthMeter;

/// One item queued for delivery to a peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A text frame.
    Text(String),
    /// A metadata record and the binary frame it describes. Queued as one
    /// item so the pair is written back-to-back or not at all.
    Telemetry { metadata: String, payload: Bytes },
}

/// Registry-side view of a peer.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub bandwidth: Arc<BandwidthMeter>,
    outbound: mpsc::Sender<Outbound>,
}

/// Result of [`ConnectionRegistry::register`].
pub struct Registration {
    pub handle: ConnectionHandle,
    /// Drained by the transport task that owns the peer's socket.
    pub outbound: mpsc::Receiver<Outbound>,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose queue accepted the item.
    pub delivered: usize,
    /// Recipients skipped because their queue was full or already closed.
    pub skipped: usize,
}

/// Shared set of open connections. Clone it cheaply – all clones share the
/// same underlying map.
#[derive(Clone, Debug)]
pub struct ConnectionRegistry {
    peers: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    /// Create a registry whose peers each get an outbound queue of
    /// `queue_capacity` items.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Add a peer and hand back its handle plus the receiving end of its
    /// outbound queue.
    pub fn register(&self, addr: SocketAddr) -> Registration {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let handle = ConnectionHandle {
            id: ConnectionId::new(),
            addr,
            bandwidth: Arc::new(BandwidthMeter::new()),
            outbound: tx,
        };
        self.peers.write().insert(handle.id, handle.clone());
        debug!(connection = %handle.id, peer = %addr, "registered");
        Registration {
            handle,
            outbound: rx,
        }
    }

    /// Remove a peer. Safe to call more than once; returns `true` only for
    /// the call that actually removed the entry.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.peers.write().remove(&id).is_some();
        if removed {
            debug!(connection = %id, "unregistered");
        }
        removed
    }

    /// Queue `item` for every open peer except `sender`.
    pub fn broadcast_except(&self, sender: ConnectionId, item: &Outbound) -> BroadcastReport {
        let peers = self.peers.read();
        let mut report = BroadcastReport::default();
        for (id, peer) in peers.iter() {
            if *id == sender {
                continue;
            }
            match peer.outbound.try_send(item.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(connection = %id, peer = %peer.addr, "outbound queue full, dropping item");
                    report.skipped += 1;
                }
                Err(TrySendError::Closed(_)) => report.skipped += 1,
            }
        }
        report
    }

    /// Queue `item` for a single peer. Returns `false` if the peer is gone or
    /// its queue is full.
    pub fn send_to(&self, id: ConnectionId, item: Outbound) -> bool {
        let peers = self.peers.read();
        match peers.get(&id) {
            Some(peer) => peer.outbound.try_send(item).is_ok(),
            None => false,
        }
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every peer's handle, taken under the read lock.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.peers.read().values().cloned().collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(crate::relay::DEFAULT_OUTBOUND_QUEUE)
    }
}
