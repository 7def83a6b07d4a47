//! Non-interactive zero-knowledge proofs over the group context.
//!
//! Both proofs are Schnorr-style sigma protocols made non-interactive with
//! the Fiat–Shamir transform: the challenge is the SHA-256 digest of the
//! statement and commitment elements in their canonical fixed-width
//! encoding, interpreted as an unsigned big-endian integer. Prover and
//! verifier must hash exactly the same bytes or cross-node verification
//! breaks.

use super::group::{CryptoContext, GroupElement};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};

fn challenge(parts: &[&GroupElement]) -> BigUint {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Proof of knowledge of a discrete log: for `y = g^x`, proves knowledge
/// of `x` without revealing it.
///
/// Commitment `t = g^z`, challenge `c = H(g || y || t)`, response
/// `r = z + c·x mod q`. Verification checks `g^r = t · y^c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofKnowDlog {
    pub g: GroupElement,
    pub y: GroupElement,
    pub t: GroupElement,
    pub r: BigUint,
}

impl ProofKnowDlog {
    pub fn new(ctx: &CryptoContext, g: &GroupElement, y: &GroupElement, x: &BigUint) -> Self {
        let z = ctx.random_exponent();
        let t = g.pow(&z);
        let c = challenge(&[g, y, &t]);
        let r = (z + c * x) % ctx.q();
        Self { g: g.clone(), y: y.clone(), t, r }
    }

    pub(crate) fn from_parts(
        g: GroupElement,
        y: GroupElement,
        t: GroupElement,
        r: BigUint,
    ) -> Self {
        Self { g, y, t, r }
    }

    pub fn verify(&self) -> bool {
        let c = challenge(&[&self.g, &self.y, &self.t]);
        self.g.pow(&self.r) == self.t.mul(&self.y.pow(&c))
    }
}

/// Proof that two discrete logs are equal: for `d = a^x` and `e = b^x`,
/// proves both exponents are the same `x`.
///
/// Commitments `g = a^z` and `h = b^z`, challenge
/// `c = H(a || b || d || e || g || h)`, response `r = z + c·x mod q`.
/// Verification checks `a^r = g · d^c` and `b^r = h · e^c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofEqDlogs {
    pub a: GroupElement,
    pub b: GroupElement,
    pub d: GroupElement,
    pub e: GroupElement,
    pub g: GroupElement,
    pub h: GroupElement,
    pub r: BigUint,
}

impl ProofEqDlogs {
    pub fn new(
        ctx: &CryptoContext,
        a: &GroupElement,
        b: &GroupElement,
        d: &GroupElement,
        e: &GroupElement,
        x: &BigUint,
    ) -> Self {
        let z = ctx.random_exponent();
        let g = a.pow(&z);
        let h = b.pow(&z);
        let c = challenge(&[a, b, d, e, &g, &h]);
        let r = (z + c * x) % ctx.q();
        Self {
            a: a.clone(),
            b: b.clone(),
            d: d.clone(),
            e: e.clone(),
            g,
            h,
            r,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        a: GroupElement,
        b: GroupElement,
        d: GroupElement,
        e: GroupElement,
        g: GroupElement,
        h: GroupElement,
        r: BigUint,
    ) -> Self {
        Self { a, b, d, e, g, h, r }
    }

    pub fn verify(&self) -> bool {
        let c = challenge(&[&self.a, &self.b, &self.d, &self.e, &self.g, &self.h]);
        self.a.pow(&self.r) == self.g.mul(&self.d.pow(&c))
            && self.b.pow(&self.r) == self.h.mul(&self.e.pow(&c))
    }
}
