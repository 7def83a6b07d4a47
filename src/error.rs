//! Error types for the conclave consensus core.
//!
//! This module provides a unified error type [`ConclaveError`] for all
//! conclave operations, along with a convenient [`Result`] type alias.
//!
//! Most of the message-handling surface is deliberately total: malformed
//! inbound payloads decode to `None` and are dropped with a counter rather
//! than surfacing an error. `ConclaveError` covers the places where failure
//! must propagate: configuration loading, wire encoding, crypto setup, and
//! protocol runs that cannot complete.

use crate::types::PeerId;
use thiserror::Error;

/// Main error type for conclave operations.
#[derive(Error, Debug)]
pub enum ConclaveError {
    // Configuration errors (fatal before the core starts)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration field '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    // Consensus errors
    #[error("Not the leader. Leader is: {leader:?}")]
    NotLeader { leader: Option<PeerId> },

    #[error("Raft log error: {0}")]
    RaftLog(String),

    // Codec errors
    #[error("Codec error: {0}")]
    Codec(String),

    // Crypto errors
    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Key generation failed: {0}")]
    Keygen(String),

    // I/O (configuration file loading)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for conclave operations.
pub type Result<T> = std::result::Result<T, ConclaveError>;
