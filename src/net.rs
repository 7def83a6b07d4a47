//! Transport-facing plumbing for the consensus core.
//!
//! The core never opens sockets. It consumes two capabilities from an
//! external transport: an inbound stream of source-tagged payloads and an
//! outbound queue of unicast/broadcast payloads. A peer-to-peer hop frames
//! each payload as `"<src_peer_id>:<payload>"`; [`Incoming::parse`] undoes
//! that framing.
//!
//! The outbound side is the only mutable object shared with the outside
//! world: a bounded MPSC queue. On overflow the newest message is dropped —
//! heartbeats recur and log replication is retried by the leader, so
//! dropping is always safe.

use crate::types::PeerId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const SRC_DELIM: char = ':';

/// An inbound payload tagged with the id of the peer that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    pub src: PeerId,
    pub payload: String,
}

impl Incoming {
    /// Parse a `"<src>:<payload>"` framed line. The payload itself may
    /// contain colons; only the first one delimits.
    pub fn parse(raw: &str) -> Option<Self> {
        let (src, payload) = raw.split_once(SRC_DELIM)?;
        let src = src.trim().parse::<PeerId>().ok()?;
        Some(Self { src, payload: payload.to_string() })
    }

    /// Frame this message the way a transport hop would.
    pub fn encoded(&self) -> String {
        format!("{}{}{}", self.src, SRC_DELIM, self.payload)
    }
}

/// An outbound payload destined for one peer or all of them.
#[derive(Debug, Clone)]
pub enum Outbound {
    Unicast { dest: PeerId, payload: String },
    Broadcast { payload: String },
}

/// Bounded outbound queue shared between the core and the transport.
///
/// Enqueueing never blocks; if the transport has fallen behind, the newest
/// message is dropped and counted.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<Outbound>,
    dropped: Arc<AtomicU64>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, dropped: Arc::new(AtomicU64::new(0)) }, rx)
    }

    /// Fire-and-forget unicast.
    pub fn send(&self, payload: String, dest: PeerId) {
        self.enqueue(Outbound::Unicast { dest, payload });
    }

    /// Fire-and-forget broadcast to all peers except self.
    pub fn broadcast(&self, payload: String) {
        self.enqueue(Outbound::Broadcast { payload });
    }

    fn enqueue(&self, message: Outbound) {
        if self.tx.try_send(message).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("outbound queue full, dropping newest message");
        }
    }

    /// Number of messages dropped due to overflow (or a closed transport).
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// In-memory transport mesh connecting every node of an in-process cluster.
///
/// Each node's outbound queue is pumped into the other nodes' inbound
/// channels with the same `"<src>:"` framing a TCP hop would apply. Used by
/// the debug cluster and the integration tests.
pub struct LoopbackMesh {
    inbound_txs: Vec<mpsc::Sender<String>>,
}

impl LoopbackMesh {
    /// Create a mesh for `cluster_size` nodes, returning the inbound
    /// receiver for each node in id order.
    pub fn new(cluster_size: usize, capacity: usize) -> (Self, Vec<mpsc::Receiver<String>>) {
        let mut inbound_txs = Vec::with_capacity(cluster_size);
        let mut inbound_rxs = Vec::with_capacity(cluster_size);
        for _ in 0..cluster_size {
            let (tx, rx) = mpsc::channel(capacity);
            inbound_txs.push(tx);
            inbound_rxs.push(rx);
        }
        (Self { inbound_txs }, inbound_rxs)
    }

    /// Spawn a pump routing `src`'s outbound traffic into the mesh.
    pub fn attach(&self, src: PeerId, mut outbound: mpsc::Receiver<Outbound>) -> JoinHandle<()> {
        let inbound_txs = self.inbound_txs.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                match message {
                    Outbound::Unicast { dest, payload } => {
                        if let Some(tx) = inbound_txs.get(dest as usize) {
                            let framed = Incoming { src, payload }.encoded();
                            let _ = tx.send(framed).await;
                        }
                    }
                    Outbound::Broadcast { payload } => {
                        for (dest, tx) in inbound_txs.iter().enumerate() {
                            if dest as PeerId == src {
                                continue;
                            }
                            let framed =
                                Incoming { src, payload: payload.clone() }.encoded();
                            let _ = tx.send(framed).await;
                        }
                    }
                }
            }
        })
    }
}
