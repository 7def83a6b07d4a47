//! ElGamal encryption under the joint public key, with threshold
//! decryption by combining per-peer shares.
//!
//! With joint key `Y = g^x` where `x = Σ x_i` is secret-shared, a
//! ciphertext `(a, b) = (g^k, m · Y^k)` decrypts once every peer has
//! published its share `a_i = a^{x_i}`: `m = b · (Π a_i)^{-1}`.

use super::group::{CryptoContext, GroupElement};
use super::message::DecryptShare;
use crate::types::PeerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// An ElGamal ciphertext `(a, b) = (g^k, m · Y^k)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext {
    pub a: GroupElement,
    pub b: GroupElement,
}

/// Encrypt `message` under the joint public key.
///
/// Returns the ciphertext and the randomness `k`, which the caller needs
/// to prove knowledge of the encryption (`a = g^k`).
pub fn encrypt(
    ctx: &CryptoContext,
    public_key: &GroupElement,
    message: &GroupElement,
) -> (Ciphertext, num_bigint::BigUint) {
    let k = ctx.random_exponent();
    let a = ctx.generator().pow(&k);
    let b = message.mul(&public_key.pow(&k));
    (Ciphertext { a, b }, k)
}

/// Recover the plaintext from a ciphertext and all `N` decryption shares.
pub fn combine_shares(
    ctx: &CryptoContext,
    ciphertext: &Ciphertext,
    shares: &[GroupElement],
) -> GroupElement {
    let mut product = ctx.id();
    for share in shares {
        product = product.mul(share);
    }
    ciphertext.b.mul(&product.inverse())
}

/// Collects verified decryption shares for one ciphertext and combines
/// them once every peer has contributed.
pub struct DecryptCoordinator {
    ctx: CryptoContext,
    session_id: String,
    peer_count: usize,
    ciphertext: Ciphertext,
    shares: Mutex<HashMap<PeerId, GroupElement>>,
}

impl DecryptCoordinator {
    pub fn new(
        ctx: CryptoContext,
        session_id: impl Into<String>,
        peer_count: usize,
        ciphertext: Ciphertext,
    ) -> Self {
        Self {
            ctx,
            session_id: session_id.into(),
            peer_count,
            ciphertext,
            shares: Mutex::new(HashMap::new()),
        }
    }

    /// Verify and record a share from `src`, whose public component is
    /// `y_src`. Returns whether the share was accepted.
    pub fn receive(&self, src: PeerId, y_src: &GroupElement, share: &DecryptShare) -> bool {
        if share.session_id != self.session_id {
            debug!(src, "decrypt share for unknown session, dropping");
            return false;
        }
        if !share.verify(y_src, &self.ciphertext) {
            warn!(src, "failed to verify decrypt share, rejecting");
            return false;
        }
        self.shares.lock().insert(src, share.a_i.clone());
        true
    }

    /// Combine once all `N` shares are present, in peer-id order.
    pub fn try_combine(&self) -> Option<GroupElement> {
        let shares = self.shares.lock();
        if shares.len() < self.peer_count {
            return None;
        }
        let ordered: Vec<GroupElement> = (0..self.peer_count as PeerId)
            .filter_map(|peer| shares.get(&peer).cloned())
            .collect();
        if ordered.len() < self.peer_count {
            return None;
        }
        Some(combine_shares(&self.ctx, &self.ciphertext, &ordered))
    }
}
