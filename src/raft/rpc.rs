//! Raft RPC message definitions and wire envelope.
//!
//! Every outbound RPC travels as a JSON envelope with a `kind`
//! discriminant and a fresh correlation `uuid`; replies arrive as `RESULT`
//! envelopes echoing the uuid of the call they answer.

use super::LogEntry;
use crate::error::{ConclaveError, Result};
use crate::types::{LogIndex, PeerId, Term};
use serde::{Deserialize, Serialize};

/// Arguments of the AppendEntries RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    /// Term of the sending leader.
    pub term: Term,
    /// Leader's id so followers can redirect clients.
    pub leader_id: PeerId,
    /// Index of the log entry immediately preceding the new ones.
    pub prev_log_index: LogIndex,
    /// Term of the `prev_log_index` entry.
    pub prev_log_term: Term,
    /// Entries to store (empty for heartbeat).
    pub entries: Vec<LogEntry>,
    /// Commit index on the leader.
    pub leader_commit: LogIndex,
}

/// Arguments of the RequestVote RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    /// Term the candidate is running in.
    pub term: Term,
    /// Candidate requesting the vote.
    pub candidate_id: PeerId,
    /// Index of the candidate's last log entry.
    pub last_log_index: LogIndex,
    /// Term of the candidate's last log entry.
    pub last_log_term: Term,
}

/// Reply to either RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResult {
    /// Id of the replying peer.
    pub src: PeerId,
    /// Whether the call succeeded (entries accepted / vote granted).
    pub success: bool,
    /// Replier's current term, for the caller to update itself.
    pub term: Term,
    /// Replier's last log index.
    pub last_log_index: LogIndex,
}

impl RpcResult {
    pub fn success(src: PeerId, term: Term, last_log_index: LogIndex) -> Self {
        Self { src, success: true, term, last_log_index }
    }

    pub fn failure(src: PeerId, term: Term, last_log_index: LogIndex) -> Self {
        Self { src, success: false, term, last_log_index }
    }
}

/// The Raft wire envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RaftMessage {
    /// Replicate log entries, or assert leadership when empty.
    #[serde(rename = "APPEND_ENTRIES")]
    AppendEntries {
        uuid: String,
        #[serde(flatten)]
        args: AppendEntriesArgs,
    },
    /// Request a vote during an election.
    #[serde(rename = "REQUEST_VOTE")]
    RequestVote {
        uuid: String,
        #[serde(flatten)]
        args: RequestVoteArgs,
    },
    /// Reply correlated to an earlier call.
    #[serde(rename = "RESULT")]
    Result {
        uuid: String,
        #[serde(flatten)]
        result: RpcResult,
    },
    /// A raw client payload forwarded toward the leader.
    #[serde(rename = "CLIENT_ENTRY")]
    ClientEntry { uuid: String, payload: String },
}

impl RaftMessage {
    /// Decode a wire payload; any failure yields `None`.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ConclaveError::Codec(e.to_string()))
    }
}
