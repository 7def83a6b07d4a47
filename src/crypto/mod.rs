//! Threshold-ElGamal cryptography for conclave.
//!
//! This module implements the distributed key generation half of the
//! system: a prime-field multiplicative group, non-interactive Schnorr
//! style proofs (knowledge of a discrete log and equality of discrete
//! logs, both via Fiat–Shamir), a self-describing message codec, the
//! commit/open DKG coordinator, and ElGamal encryption with threshold
//! decryption shares.
//!
//! All group elements and scalars travel base64-encoded in fixed-width
//! big-endian form; hashing those canonical bytes is what binds proofs and
//! commitments across nodes, so every module here encodes through the same
//! helpers.

mod elgamal;
mod group;
mod keygen;
mod message;
mod proofs;

pub use elgamal::{combine_shares, encrypt, Ciphertext, DecryptCoordinator};
pub use group::{CryptoContext, GroupElement};
pub use keygen::{DkgSession, KeyShare, LocalShare};
pub use message::{CryptoMessage, DecryptShare, KeygenCommit, KeygenOpening, PostVote};
pub use proofs::{ProofEqDlogs, ProofKnowDlog};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use num_bigint::BigUint;
use sha2::{Digest, Sha256};

/// Default group modulus, shared by every node of a deployment.
pub const DEFAULT_PRIME: &str = "23817474847197617423";

pub(crate) fn b64_encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub(crate) fn b64_decode(s: &str) -> Option<Vec<u8>> {
    BASE64.decode(s).ok()
}

pub(crate) fn b64_from_biguint(n: &BigUint) -> String {
    b64_encode(&n.to_bytes_be())
}

pub(crate) fn b64_to_biguint(s: &str) -> Option<BigUint> {
    b64_decode(s).map(|bytes| BigUint::from_bytes_be(&bytes))
}

/// SHA-256 digest, used for commitments and Fiat–Shamir challenges.
pub(crate) fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}
