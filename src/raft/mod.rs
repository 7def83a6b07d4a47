//! Raft consensus implementation for the conclave peer cluster.
//!
//! This module implements the Raft consensus algorithm for replicating an
//! ordered log of opaque client entries across a fixed set of peers. It
//! handles leader election, log replication, commit advancement, and
//! in-order delivery to the client sink.

// A panic in a handler would take the whole node down mid-election or
// mid-replication, so errors must always propagate here.
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod log;
mod node;
mod pending;
pub mod rpc;

pub use log::{LogEntry, RaftLog};
pub use node::{ClientSink, RaftNode};
pub use rpc::{AppendEntriesArgs, RaftMessage, RequestVoteArgs, RpcResult};
