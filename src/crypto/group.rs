//! Prime-field multiplicative group arithmetic.
//!
//! A [`CryptoContext`] holds the public prime `p`, the subgroup order
//! `q = (p - 1) / 2` (safe-prime assumption), and a fixed generator. A
//! [`GroupElement`] is an integer in `[0, p)`, always kept reduced mod `p`.
//! Byte encoding is fixed-width big-endian, left-padded to the byte length
//! of `p`; decoding rejects values `>= p`.

use super::{b64_decode, b64_encode};
use crate::error::{ConclaveError, Result};
use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::rngs::OsRng;
use std::fmt;
use std::sync::Arc;

/// Shared group parameters for one deployment.
#[derive(Debug, Clone)]
pub struct CryptoContext {
    p: Arc<BigUint>,
    q: BigUint,
    g: GroupElement,
    element_len: usize,
}

impl CryptoContext {
    /// Create a context over the prime modulus `p`.
    pub fn new(p: BigUint) -> Result<Self> {
        if p < BigUint::from(7u32) {
            return Err(ConclaveError::Crypto("group modulus too small".to_string()));
        }
        let q = (&p - BigUint::one()) >> 1;
        let element_len = ((p.bits() + 7) / 8) as usize;
        let p = Arc::new(p);
        // 4 = 2^2 is a quadratic residue, so it generates the order-q
        // subgroup of a safe prime.
        let g = GroupElement::reduced(Arc::clone(&p), BigUint::from(4u32));
        Ok(Self { p, q, g, element_len })
    }

    /// Context over the deployment-wide default prime.
    pub fn with_default_prime() -> Self {
        let p = super::DEFAULT_PRIME
            .parse::<BigUint>()
            .expect("default prime is a valid integer");
        Self::new(p).expect("default prime is a valid modulus")
    }

    pub fn p(&self) -> &BigUint {
        &self.p
    }

    pub fn q(&self) -> &BigUint {
        &self.q
    }

    /// The fixed generator `g`.
    pub fn generator(&self) -> &GroupElement {
        &self.g
    }

    /// The multiplicative identity.
    pub fn id(&self) -> GroupElement {
        GroupElement::reduced(Arc::clone(&self.p), BigUint::one())
    }

    /// Byte width of an encoded group element.
    pub fn element_len(&self) -> usize {
        self.element_len
    }

    /// Build an element from an arbitrary integer, reducing mod `p`.
    pub fn element(&self, value: BigUint) -> GroupElement {
        GroupElement::reduced(Arc::clone(&self.p), value)
    }

    /// Decode a fixed-width big-endian element; values `>= p` are rejected.
    pub fn decode_element(&self, bytes: &[u8]) -> Option<GroupElement> {
        let value = BigUint::from_bytes_be(bytes);
        if value >= *self.p {
            return None;
        }
        Some(GroupElement { modulus: Arc::clone(&self.p), value })
    }

    /// Decode a base64-encoded element.
    pub fn element_from_b64(&self, s: &str) -> Option<GroupElement> {
        self.decode_element(&b64_decode(s)?)
    }

    /// Sample a secret exponent uniformly from `[1, q)`.
    pub fn random_exponent(&self) -> BigUint {
        OsRng.gen_biguint_range(&BigUint::one(), &self.q)
    }
}

/// An element of the multiplicative group mod `p`.
#[derive(Clone)]
pub struct GroupElement {
    modulus: Arc<BigUint>,
    value: BigUint,
}

impl GroupElement {
    fn reduced(modulus: Arc<BigUint>, value: BigUint) -> Self {
        let value = value % &*modulus;
        Self { modulus, value }
    }

    pub fn value(&self) -> &BigUint {
        &self.value
    }

    /// Group multiplication.
    pub fn mul(&self, other: &GroupElement) -> GroupElement {
        GroupElement {
            modulus: Arc::clone(&self.modulus),
            value: (&self.value * &other.value) % &*self.modulus,
        }
    }

    /// Modular exponentiation.
    pub fn pow(&self, exponent: &BigUint) -> GroupElement {
        GroupElement {
            modulus: Arc::clone(&self.modulus),
            value: self.value.modpow(exponent, &self.modulus),
        }
    }

    /// Multiplicative inverse (via Fermat: `a^{p-2}` for prime `p`).
    pub fn inverse(&self) -> GroupElement {
        let exponent = &*self.modulus - BigUint::from(2u32);
        self.pow(&exponent)
    }

    /// Fixed-width big-endian encoding, left-padded with zeros to the byte
    /// length of `p`.
    pub fn as_bytes(&self) -> Vec<u8> {
        let width = ((self.modulus.bits() + 7) / 8) as usize;
        let raw = self.value.to_bytes_be();
        let mut out = vec![0u8; width.saturating_sub(raw.len())];
        out.extend_from_slice(&raw);
        out
    }

    pub fn to_b64(&self) -> String {
        b64_encode(&self.as_bytes())
    }
}

impl PartialEq for GroupElement {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for GroupElement {}

impl fmt::Debug for GroupElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupElement({})", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CryptoContext {
        CryptoContext::with_default_prime()
    }

    #[test]
    fn test_element_is_reduced() {
        let ctx = ctx();
        let e = ctx.element(ctx.p() * 3u32 + 5u32);
        assert_eq!(e.value(), &BigUint::from(5u32));
    }

    #[test]
    fn test_pow_mul_consistency() {
        let ctx = ctx();
        let g = ctx.generator();
        let g2 = g.pow(&BigUint::from(2u32));
        assert_eq!(g.mul(g), g2);
    }

    #[test]
    fn test_inverse_law() {
        let ctx = ctx();
        let x = ctx.random_exponent();
        let e = ctx.generator().pow(&x);
        assert_eq!(e.mul(&e.inverse()), ctx.id());
    }

    #[test]
    fn test_encoding_is_fixed_width() {
        let ctx = ctx();
        let small = ctx.element(BigUint::from(1u32));
        assert_eq!(small.as_bytes().len(), ctx.element_len());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let ctx = ctx();
        let e = ctx.generator().pow(&ctx.random_exponent());
        let decoded = ctx.decode_element(&e.as_bytes()).unwrap();
        assert_eq!(decoded, e);
    }

    #[test]
    fn test_decode_rejects_out_of_range() {
        let ctx = ctx();
        let too_big = ctx.p().to_bytes_be();
        assert!(ctx.decode_element(&too_big).is_none());
    }

    #[test]
    fn test_random_exponent_in_range() {
        let ctx = ctx();
        for _ in 0..32 {
            let x = ctx.random_exponent();
            assert!(x >= BigUint::one());
            assert!(&x < ctx.q());
        }
    }
}
