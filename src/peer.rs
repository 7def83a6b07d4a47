//! Peer wiring: one node's consensus core assembled from configuration.
//!
//! A [`ConsensusPeer`] owns the Raft node and the DKG session, and runs
//! the two logical threads of the core: an I/O task that decodes inbound
//! payloads and dispatches them to the right state machine, and a tick
//! task that drives timeouts, heartbeats, and commit application. The
//! external transport talks to the peer through an inbound channel of
//! framed lines and the bounded outbound queue.

use crate::config::ConclaveConfig;
use crate::crypto::{CryptoContext, CryptoMessage, DkgSession, KeyShare};
use crate::error::Result;
use crate::net::{Incoming, Outbound, OutboundQueue};
use crate::raft::{ClientSink, RaftMessage, RaftNode};
use crate::types::PeerId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Capacity of the outbound queue shared with the transport.
const OUTBOUND_CAPACITY: usize = 1024;

/// A single node's consensus core.
pub struct ConsensusPeer {
    id: PeerId,
    raft: RaftNode,
    dkg: Arc<DkgSession>,
    outbound: OutboundQueue,
    malformed: Arc<AtomicU64>,
    tick_interval: std::time::Duration,
}

impl ConsensusPeer {
    /// Build a peer from validated configuration. Returns the peer and the
    /// outbound receiver the transport must drain.
    pub fn new(
        config: &ConclaveConfig,
        ctx: CryptoContext,
        session_id: &str,
        sink: Arc<dyn ClientSink>,
    ) -> Result<(Self, mpsc::Receiver<Outbound>)> {
        config.validate()?;
        let (outbound, outbound_rx) = OutboundQueue::new(OUTBOUND_CAPACITY);
        let raft = RaftNode::new(
            config.id,
            config.peer_count(),
            config.raft.clone(),
            outbound.clone(),
            sink,
        );
        let dkg = Arc::new(DkgSession::new(ctx, session_id, config.id, config.peer_count()));
        let peer = Self {
            id: config.id,
            raft,
            dkg,
            outbound,
            malformed: Arc::new(AtomicU64::new(0)),
            tick_interval: config.raft.tick_interval(),
        };
        Ok((peer, outbound_rx))
    }

    /// Spawn the I/O and tick tasks. The returned handles keep running
    /// until aborted or the inbound channel closes.
    pub fn start(&self, mut inbound: mpsc::Receiver<String>) -> Vec<JoinHandle<()>> {
        let raft = self.raft.clone();
        let dkg = Arc::clone(&self.dkg);
        let malformed = Arc::clone(&self.malformed);
        let io_task = tokio::spawn(async move {
            while let Some(line) = inbound.recv().await {
                dispatch(&raft, &dkg, &malformed, &line);
            }
        });

        let raft = self.raft.clone();
        let tick_interval = self.tick_interval;
        let tick_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            loop {
                ticker.tick().await;
                raft.tick();
            }
        });

        vec![io_task, tick_task]
    }

    /// Run the distributed key generation to completion.
    pub async fn run_keygen(&self) -> Result<KeyShare> {
        self.dkg.run(&self.outbound).await
    }

    /// Submit a client payload into the replicated log.
    pub fn submit(&self, payload: impl Into<String>) {
        self.raft.submit(payload);
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn raft(&self) -> &RaftNode {
        &self.raft
    }

    pub fn dkg(&self) -> &DkgSession {
        &self.dkg
    }

    /// Inbound payloads that decoded as neither a Raft RPC nor a crypto
    /// message.
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

/// Decode one framed inbound line and route it to the owning state
/// machine. Malformed input is dropped with a counter; nothing here can
/// fail outward.
fn dispatch(raft: &RaftNode, dkg: &DkgSession, malformed: &AtomicU64, line: &str) {
    let Some(incoming) = Incoming::parse(line) else {
        malformed.fetch_add(1, Ordering::Relaxed);
        debug!("unframed inbound payload, dropping");
        return;
    };
    if let Some(message) = RaftMessage::decode(&incoming.payload) {
        raft.handle_message(message);
    } else if let Some(message) = CryptoMessage::decode(dkg.context(), &incoming.payload) {
        dkg.receive(incoming.src, message);
    } else {
        malformed.fetch_add(1, Ordering::Relaxed);
        debug!(src = incoming.src, "undecodable inbound payload, dropping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConclaveConfig;

    struct NullSink;

    impl ClientSink for NullSink {
        fn deliver(&self, _payload: &str) {}
    }

    #[tokio::test]
    async fn test_dispatch_counts_malformed() {
        let config = ConclaveConfig::development(3);
        let ctx = CryptoContext::with_default_prime();
        let (peer, _rx) = ConsensusPeer::new(&config, ctx, "run-1", Arc::new(NullSink)).unwrap();

        dispatch(peer.raft(), peer.dkg(), &peer.malformed, "no frame");
        dispatch(peer.raft(), peer.dkg(), &peer.malformed, "1:not a message");
        assert_eq!(peer.malformed(), 2);
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let mut config = ConclaveConfig::development(3);
        config.id = 9;
        let ctx = CryptoContext::with_default_prime();
        assert!(ConsensusPeer::new(&config, ctx, "run-1", Arc::new(NullSink)).is_err());
    }
}
