//! Distributed key generation coordinator.
//!
//! One [`DkgSession`] drives a single commit/open run for a fixed session
//! id: publish a binding commitment to `y_i = g^{x_i}`, wait for every
//! peer's commitment, publish the opening with a proof of knowledge of
//! `x_i`, wait for every opening, then verify and aggregate the joint
//! public key `Y = Π y_j` over the accepted peers.
//!
//! Waiting is event-driven: receipt of a commit or opening notifies the
//! coordinator, which re-checks its condition under the lock. The protocol
//! requires all `N` peers; a silent peer stalls the run by design.

use super::group::{CryptoContext, GroupElement};
use super::message::{CryptoMessage, KeygenCommit, KeygenOpening};
use super::proofs::ProofKnowDlog;
use super::sha256;
use crate::error::Result;
use crate::net::OutboundQueue;
use crate::types::PeerId;
use num_bigint::BigUint;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// A node-private DKG contribution.
pub struct LocalShare {
    /// Secret exponent in `[1, q)`.
    pub x_i: BigUint,
    /// Public component `y_i = g^{x_i}`.
    pub y_i: GroupElement,
    /// Proof of knowledge of `x_i`.
    pub proof: ProofKnowDlog,
    /// Binding commitment `H(y_i)`.
    pub commitment: Vec<u8>,
}

impl LocalShare {
    pub fn generate(ctx: &CryptoContext) -> Self {
        let x_i = ctx.random_exponent();
        let y_i = ctx.generator().pow(&x_i);
        let proof = ProofKnowDlog::new(ctx, ctx.generator(), &y_i, &x_i);
        let commitment = sha256(&y_i.as_bytes());
        Self { x_i, y_i, proof, commitment }
    }
}

impl fmt::Debug for LocalShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The secret exponent stays out of logs.
        f.debug_struct("LocalShare")
            .field("y_i", &self.y_i)
            .finish_non_exhaustive()
    }
}

/// The outcome of a completed DKG run.
pub struct KeyShare {
    /// Joint public key `Y = Π y_j` over accepted peers.
    pub public_key: GroupElement,
    /// This node's secret exponent.
    pub x_i: BigUint,
    /// This node's public component.
    pub y_i: GroupElement,
}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShare")
            .field("public_key", &self.public_key)
            .field("y_i", &self.y_i)
            .finish_non_exhaustive()
    }
}

struct OpeningRecord {
    opening: KeygenOpening,
    /// Whether this peer's commitment was already present when the opening
    /// arrived. An opening that outran its commitment is never accepted.
    commit_seen: bool,
}

#[derive(Default)]
struct DkgState {
    commitments: HashMap<PeerId, KeygenCommit>,
    openings: HashMap<PeerId, OpeningRecord>,
    stale_dropped: u64,
}

/// Per-node coordinator for one DKG run.
pub struct DkgSession {
    ctx: CryptoContext,
    session_id: String,
    id: PeerId,
    peer_count: usize,
    state: Mutex<DkgState>,
    progress: Notify,
}

impl DkgSession {
    pub fn new(
        ctx: CryptoContext,
        session_id: impl Into<String>,
        id: PeerId,
        peer_count: usize,
    ) -> Self {
        Self {
            ctx,
            session_id: session_id.into(),
            id,
            peer_count,
            state: Mutex::new(DkgState::default()),
            progress: Notify::new(),
        }
    }

    pub fn context(&self) -> &CryptoContext {
        &self.ctx
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Messages carrying a session id other than this run's are dropped.
    pub fn stale_dropped(&self) -> u64 {
        self.state.lock().stale_dropped
    }

    /// Feed an inbound crypto message from peer `src` into the session.
    pub fn receive(&self, src: PeerId, message: CryptoMessage) {
        let mut state = self.state.lock();
        if message.session_id() != self.session_id {
            state.stale_dropped += 1;
            debug!(src, session = message.session_id(), "message for unknown session, dropping");
            return;
        }
        match message {
            CryptoMessage::KeygenCommit(commit) => {
                if state.commitments.contains_key(&src) {
                    debug!(src, "duplicate commitment, keeping first");
                } else {
                    state.commitments.insert(src, commit);
                }
            }
            CryptoMessage::KeygenOpening(opening) => {
                if state.openings.contains_key(&src) {
                    debug!(src, "duplicate opening, keeping first");
                } else {
                    let commit_seen = state.commitments.contains_key(&src);
                    state.openings.insert(src, OpeningRecord { opening, commit_seen });
                }
            }
            CryptoMessage::PostVote(_) | CryptoMessage::DecryptShare(_) => {
                debug!(src, "non-keygen message in keygen session, ignoring");
            }
        }
        drop(state);
        self.progress.notify_waiters();
    }

    /// Run the protocol to completion, broadcasting through `outbound`.
    pub async fn run(&self, outbound: &OutboundQueue) -> Result<KeyShare> {
        let share = LocalShare::generate(&self.ctx);

        // Round 1: publish the commitment and wait for all N.
        let commit = KeygenCommit::for_share(&self.ctx, self.session_id.as_str(), &share);
        self.state.lock().commitments.insert(self.id, commit.clone());
        outbound.broadcast(CryptoMessage::KeygenCommit(commit).encode()?);
        debug!(id = self.id, "published keygen commitment");
        self.wait_for(|state| state.commitments.len() >= self.peer_count).await;

        // Round 2: publish the opening and wait for all N.
        let opening = KeygenOpening::for_share(self.session_id.as_str(), &share);
        self.state.lock().openings.insert(
            self.id,
            OpeningRecord { opening: opening.clone(), commit_seen: true },
        );
        outbound.broadcast(CryptoMessage::KeygenOpening(opening).encode()?);
        debug!(id = self.id, "published keygen opening");
        self.wait_for(|state| state.openings.len() >= self.peer_count).await;

        // Verify every peer and aggregate the joint key. Iterating in
        // peer-id order keeps the accepted set deterministic for a given
        // set of inputs.
        let state = self.state.lock();
        let mut public_key = self.ctx.id();
        let mut accepted = 0usize;
        for peer in 0..self.peer_count as PeerId {
            let (commit, record) = match (state.commitments.get(&peer), state.openings.get(&peer)) {
                (Some(c), Some(o)) => (c, o),
                _ => {
                    warn!(id = self.id, peer, "missing commitment or opening, excluding peer");
                    continue;
                }
            };
            if !record.commit_seen {
                warn!(id = self.id, peer, "commitment arrived after opening, excluding peer");
                continue;
            }
            if !record.opening.verify(commit) {
                warn!(id = self.id, peer, "failed to verify opening against commitment, excluding peer");
                continue;
            }
            public_key = public_key.mul(&record.opening.y_i);
            accepted += 1;
        }

        info!(id = self.id, accepted, total = self.peer_count, "key generation complete");
        Ok(KeyShare { public_key, x_i: share.x_i, y_i: share.y_i })
    }

    async fn wait_for(&self, condition: impl Fn(&DkgState) -> bool) {
        loop {
            // Register for the notification before checking, so an insert
            // racing with the check cannot be missed.
            let notified = self.progress.notified();
            if condition(&self.state.lock()) {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_share_is_consistent() {
        let ctx = CryptoContext::with_default_prime();
        let share = LocalShare::generate(&ctx);
        assert_eq!(share.y_i, ctx.generator().pow(&share.x_i));
        assert!(share.proof.verify());
        assert_eq!(share.commitment, sha256(&share.y_i.as_bytes()));
    }

    #[test]
    fn test_receive_drops_foreign_session() {
        let ctx = CryptoContext::with_default_prime();
        let session = DkgSession::new(ctx.clone(), "run-1", 0, 2);
        let share = LocalShare::generate(&ctx);
        let commit = KeygenCommit::for_share(&ctx, "run-2", &share);
        session.receive(1, CryptoMessage::KeygenCommit(commit));
        assert_eq!(session.stale_dropped(), 1);
        assert!(session.state.lock().commitments.is_empty());
    }

    #[test]
    fn test_receive_keeps_first_commitment() {
        let ctx = CryptoContext::with_default_prime();
        let session = DkgSession::new(ctx.clone(), "run-1", 0, 2);
        let first = KeygenCommit::for_share(&ctx, "run-1", &LocalShare::generate(&ctx));
        let second = KeygenCommit::for_share(&ctx, "run-1", &LocalShare::generate(&ctx));
        session.receive(1, CryptoMessage::KeygenCommit(first.clone()));
        session.receive(1, CryptoMessage::KeygenCommit(second));
        assert_eq!(session.state.lock().commitments[&1], first);
    }

    #[test]
    fn test_opening_before_commit_is_marked() {
        let ctx = CryptoContext::with_default_prime();
        let session = DkgSession::new(ctx.clone(), "run-1", 0, 2);
        let share = LocalShare::generate(&ctx);
        session.receive(1, CryptoMessage::KeygenOpening(KeygenOpening::for_share("run-1", &share)));
        session.receive(
            1,
            CryptoMessage::KeygenCommit(KeygenCommit::for_share(&ctx, "run-1", &share)),
        );
        let state = session.state.lock();
        assert!(!state.openings[&1].commit_seen);
    }
}
