//! Conclave - a peer-to-peer consensus core pairing Raft log replication
//! with threshold-ElGamal distributed key generation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Conclave                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Client sink: committed entries, in order, exactly once     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Raft core: election | replication | commit | correlation   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  DKG: commit/open rounds | ZK proofs | joint public key     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport contract: inbound lines | bounded outbound queue │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport itself (sockets, framing onto the network) is external;
//! the core consumes an inbound stream of `"<src>:"`-tagged payloads and
//! fills a bounded outbound queue of unicast/broadcast payloads. Two
//! disjoint wire codecs coexist on that stream: Raft RPC envelopes and
//! crypto messages, both self-describing JSON.
//!
//! # Quick start
//!
//! ```no_run
//! use conclave::config::ConclaveConfig;
//! use conclave::crypto::CryptoContext;
//! use conclave::peer::ConsensusPeer;
//! use conclave::raft::ClientSink;
//! use std::sync::Arc;
//!
//! struct PrintSink;
//!
//! impl ClientSink for PrintSink {
//!     fn deliver(&self, payload: &str) {
//!         println!("committed: {payload}");
//!     }
//! }
//!
//! # async fn run() -> conclave::Result<()> {
//! let config = ConclaveConfig::development(3);
//! let ctx = CryptoContext::with_default_prime();
//! let (peer, _outbound_rx) = ConsensusPeer::new(&config, ctx, "run-1", Arc::new(PrintSink))?;
//! let (_inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(64);
//! peer.start(inbound_rx);
//! let key_share = peer.run_keygen().await?;
//! println!("joint key: {:?}", key_share.public_key);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod net;
pub mod peer;
pub mod raft;
pub mod types;

// Re-exports
pub use error::{ConclaveError, Result};
pub use types::{LogIndex, PeerId, Term};
