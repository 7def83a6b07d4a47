//! Self-describing crypto message codec.
//!
//! Every message is a JSON envelope with a `kind` discriminant, a
//! non-empty `session_id` tagging the protocol run, and kind-specific
//! fields carrying base64-encoded group elements, scalars, and proofs.
//!
//! Decoding is total: a missing field, an unknown kind, an empty session
//! id, an out-of-range element, or an unparseable proof all yield `None`,
//! never an error. Encoding is canonical per kind so hashing encoded
//! subfields is reproducible across nodes.

use super::elgamal::Ciphertext;
use super::group::{CryptoContext, GroupElement};
use super::keygen::{KeyShare, LocalShare};
use super::proofs::{ProofEqDlogs, ProofKnowDlog};
use super::{b64_decode, b64_encode, b64_from_biguint, b64_to_biguint, sha256};
use crate::error::{ConclaveError, Result};
use serde::{Deserialize, Serialize};

/// A decoded crypto message, dispatched with a flat match on the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoMessage {
    KeygenCommit(KeygenCommit),
    KeygenOpening(KeygenOpening),
    PostVote(PostVote),
    DecryptShare(DecryptShare),
}

/// Commitment round of the DKG: a binding hash of the sender's public
/// component, plus the generator it was formed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeygenCommit {
    pub session_id: String,
    pub commitment: Vec<u8>,
    pub g: GroupElement,
}

/// Opening round of the DKG: the public component `y_i` with a proof of
/// knowledge of its discrete log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeygenOpening {
    pub session_id: String,
    pub y_i: GroupElement,
    pub proof: ProofKnowDlog,
}

/// A ballot encrypted under the joint public key, with a proof of
/// knowledge of the encryption randomness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostVote {
    pub session_id: String,
    pub vote: Ciphertext,
    pub proof: ProofKnowDlog,
}

/// One peer's decryption share `a_i = a^{x_i}` for a ciphertext, with a
/// proof that the same exponent underlies `y_i` and `a_i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptShare {
    pub session_id: String,
    /// Identifies the ciphertext this share decrypts.
    pub id: String,
    pub a_i: GroupElement,
    pub proof: ProofEqDlogs,
    pub g: GroupElement,
}

impl KeygenCommit {
    pub fn for_share(ctx: &CryptoContext, session_id: impl Into<String>, share: &LocalShare) -> Self {
        Self {
            session_id: session_id.into(),
            commitment: share.commitment.clone(),
            g: ctx.generator().clone(),
        }
    }

    /// Check that `opening` is the value this commitment binds.
    pub fn verify(&self, opening: &GroupElement) -> bool {
        sha256(&opening.as_bytes()) == self.commitment
    }
}

impl KeygenOpening {
    pub fn for_share(session_id: impl Into<String>, share: &LocalShare) -> Self {
        Self {
            session_id: session_id.into(),
            y_i: share.y_i.clone(),
            proof: share.proof.clone(),
        }
    }

    /// An opening is valid against its commitment iff the committed hash
    /// matches, the proof verifies, and the proof's statement is exactly
    /// `(g, y_i)` — a proof borrowed from another statement is rejected.
    pub fn verify(&self, commit: &KeygenCommit) -> bool {
        commit.verify(&self.y_i)
            && self.proof.verify()
            && self.proof.y == self.y_i
            && self.proof.g == commit.g
    }
}

impl PostVote {
    /// Encrypt `message` under `public_key` and prove knowledge of the
    /// encryption randomness (`vote.a = g^k`).
    pub fn create(
        ctx: &CryptoContext,
        session_id: impl Into<String>,
        public_key: &GroupElement,
        message: &GroupElement,
    ) -> Self {
        let (vote, k) = super::elgamal::encrypt(ctx, public_key, message);
        let proof = ProofKnowDlog::new(ctx, ctx.generator(), &vote.a, &k);
        Self { session_id: session_id.into(), vote, proof }
    }

    pub fn verify(&self, ctx: &CryptoContext) -> bool {
        self.proof.verify()
            && self.proof.g == *ctx.generator()
            && self.proof.y == self.vote.a
    }
}

impl DecryptShare {
    /// Build this peer's share for `ciphertext`, proving that the exponent
    /// of `a_i` over `a` equals that of `y_i` over `g`.
    pub fn create(
        ctx: &CryptoContext,
        session_id: impl Into<String>,
        id: impl Into<String>,
        key_share: &KeyShare,
        ciphertext: &Ciphertext,
    ) -> Self {
        let a_i = ciphertext.a.pow(&key_share.x_i);
        let proof = ProofEqDlogs::new(
            ctx,
            ctx.generator(),
            &ciphertext.a,
            &key_share.y_i,
            &a_i,
            &key_share.x_i,
        );
        Self {
            session_id: session_id.into(),
            id: id.into(),
            a_i,
            proof,
            g: ctx.generator().clone(),
        }
    }

    /// Verify the share against the sender's public component and the
    /// ciphertext, binding every statement element.
    pub fn verify(&self, y_i: &GroupElement, ciphertext: &Ciphertext) -> bool {
        self.proof.verify()
            && self.proof.a == self.g
            && self.proof.b == ciphertext.a
            && self.proof.d == *y_i
            && self.proof.e == self.a_i
    }
}

impl CryptoMessage {
    pub fn session_id(&self) -> &str {
        match self {
            CryptoMessage::KeygenCommit(m) => &m.session_id,
            CryptoMessage::KeygenOpening(m) => &m.session_id,
            CryptoMessage::PostVote(m) => &m.session_id,
            CryptoMessage::DecryptShare(m) => &m.session_id,
        }
    }

    /// Decode a wire payload. Any failure yields `None`.
    pub fn decode(ctx: &CryptoContext, raw: &str) -> Option<Self> {
        let wire: WireCryptoMessage = serde_json::from_str(raw).ok()?;
        if wire.session_id().is_empty() {
            return None;
        }
        match wire {
            WireCryptoMessage::KeygenCommit { session_id, commitment, g } => {
                Some(CryptoMessage::KeygenCommit(KeygenCommit {
                    session_id,
                    commitment: b64_decode(&commitment)?,
                    g: ctx.element_from_b64(&g)?,
                }))
            }
            WireCryptoMessage::KeygenOpening { session_id, y_i, proof } => {
                Some(CryptoMessage::KeygenOpening(KeygenOpening {
                    session_id,
                    y_i: ctx.element_from_b64(&y_i)?,
                    proof: proof.decode(ctx)?,
                }))
            }
            WireCryptoMessage::PostVote { session_id, vote, proof } => {
                Some(CryptoMessage::PostVote(PostVote {
                    session_id,
                    vote: vote.decode(ctx)?,
                    proof: proof.decode(ctx)?,
                }))
            }
            WireCryptoMessage::DecryptShare { session_id, id, a_i, proof, g } => {
                if id.is_empty() {
                    return None;
                }
                Some(CryptoMessage::DecryptShare(DecryptShare {
                    session_id,
                    id,
                    a_i: ctx.element_from_b64(&a_i)?,
                    proof: proof.decode(ctx)?,
                    g: ctx.element_from_b64(&g)?,
                }))
            }
        }
    }

    /// Canonical wire encoding.
    pub fn encode(&self) -> Result<String> {
        let wire = match self {
            CryptoMessage::KeygenCommit(m) => WireCryptoMessage::KeygenCommit {
                session_id: m.session_id.clone(),
                commitment: b64_encode(&m.commitment),
                g: m.g.to_b64(),
            },
            CryptoMessage::KeygenOpening(m) => WireCryptoMessage::KeygenOpening {
                session_id: m.session_id.clone(),
                y_i: m.y_i.to_b64(),
                proof: WireKnowDlog::encode(&m.proof),
            },
            CryptoMessage::PostVote(m) => WireCryptoMessage::PostVote {
                session_id: m.session_id.clone(),
                vote: WireCiphertext::encode(&m.vote),
                proof: WireKnowDlog::encode(&m.proof),
            },
            CryptoMessage::DecryptShare(m) => WireCryptoMessage::DecryptShare {
                session_id: m.session_id.clone(),
                id: m.id.clone(),
                a_i: m.a_i.to_b64(),
                proof: WireEqDlogs::encode(&m.proof),
                g: m.g.to_b64(),
            },
        };
        serde_json::to_string(&wire).map_err(|e| ConclaveError::Codec(e.to_string()))
    }
}

// Wire representations: every element and scalar travels base64-encoded.

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum WireCryptoMessage {
    #[serde(rename = "KEYGEN_COMMIT")]
    KeygenCommit {
        session_id: String,
        commitment: String,
        g: String,
    },
    #[serde(rename = "KEYGEN_OPENING")]
    KeygenOpening {
        session_id: String,
        y_i: String,
        proof: WireKnowDlog,
    },
    #[serde(rename = "POST_VOTE")]
    PostVote {
        session_id: String,
        vote: WireCiphertext,
        proof: WireKnowDlog,
    },
    #[serde(rename = "DECRYPT_SHARE")]
    DecryptShare {
        session_id: String,
        id: String,
        a_i: String,
        proof: WireEqDlogs,
        g: String,
    },
}

impl WireCryptoMessage {
    fn session_id(&self) -> &str {
        match self {
            WireCryptoMessage::KeygenCommit { session_id, .. } => session_id,
            WireCryptoMessage::KeygenOpening { session_id, .. } => session_id,
            WireCryptoMessage::PostVote { session_id, .. } => session_id,
            WireCryptoMessage::DecryptShare { session_id, .. } => session_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireKnowDlog {
    g: String,
    y: String,
    t: String,
    r: String,
}

impl WireKnowDlog {
    fn encode(proof: &ProofKnowDlog) -> Self {
        Self {
            g: proof.g.to_b64(),
            y: proof.y.to_b64(),
            t: proof.t.to_b64(),
            r: b64_from_biguint(&proof.r),
        }
    }

    fn decode(self, ctx: &CryptoContext) -> Option<ProofKnowDlog> {
        Some(ProofKnowDlog::from_parts(
            ctx.element_from_b64(&self.g)?,
            ctx.element_from_b64(&self.y)?,
            ctx.element_from_b64(&self.t)?,
            b64_to_biguint(&self.r)?,
        ))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEqDlogs {
    a: String,
    b: String,
    d: String,
    e: String,
    g: String,
    h: String,
    r: String,
}

impl WireEqDlogs {
    fn encode(proof: &ProofEqDlogs) -> Self {
        Self {
            a: proof.a.to_b64(),
            b: proof.b.to_b64(),
            d: proof.d.to_b64(),
            e: proof.e.to_b64(),
            g: proof.g.to_b64(),
            h: proof.h.to_b64(),
            r: b64_from_biguint(&proof.r),
        }
    }

    fn decode(self, ctx: &CryptoContext) -> Option<ProofEqDlogs> {
        Some(ProofEqDlogs::from_parts(
            ctx.element_from_b64(&self.a)?,
            ctx.element_from_b64(&self.b)?,
            ctx.element_from_b64(&self.d)?,
            ctx.element_from_b64(&self.e)?,
            ctx.element_from_b64(&self.g)?,
            ctx.element_from_b64(&self.h)?,
            b64_to_biguint(&self.r)?,
        ))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireCiphertext {
    a: String,
    b: String,
}

impl WireCiphertext {
    fn encode(ct: &Ciphertext) -> Self {
        Self { a: ct.a.to_b64(), b: ct.b.to_b64() }
    }

    fn decode(self, ctx: &CryptoContext) -> Option<Ciphertext> {
        Some(Ciphertext {
            a: ctx.element_from_b64(&self.a)?,
            b: ctx.element_from_b64(&self.b)?,
        })
    }
}
