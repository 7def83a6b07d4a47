//! Outbound-call bookkeeping for correlated RPC replies.
//!
//! Each outbound call registers its correlation uuid with the number of
//! replies it expects (1 for a unicast, N-1 for a broadcast) and a typed
//! action describing how replies should be interpreted. The registry lives
//! under the role mutex; replies with unknown uuids are delayed stragglers
//! and are dropped silently with a counter.

use crate::types::Term;
use std::collections::HashMap;

/// What to do with replies to a registered call. Each action carries the
/// term it was issued under; a reply arriving after the term has moved on
/// must be a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyAction {
    /// Count granted votes toward a quorum for the election of `term`.
    ElectionTally { term: Term },
    /// Adjust replication bookkeeping for the leader of `term`.
    Replication { term: Term },
}

#[derive(Debug)]
pub(crate) struct PendingCall {
    pub remaining: usize,
    pub action: ReplyAction,
}

/// Registry mapping correlation uuid to its pending callback record.
#[derive(Debug, Default)]
pub(crate) struct PendingRpcs {
    calls: HashMap<String, PendingCall>,
    unknown_dropped: u64,
}

impl PendingRpcs {
    pub fn register(&mut self, uuid: String, remaining: usize, action: ReplyAction) {
        if remaining == 0 {
            return;
        }
        self.calls.insert(uuid, PendingCall { remaining, action });
    }

    /// Remove the record for `uuid`; the caller decrements `remaining` and
    /// puts it back while replies are still expected.
    pub fn take(&mut self, uuid: &str) -> Option<PendingCall> {
        self.calls.remove(uuid)
    }

    pub fn put_back(&mut self, uuid: String, call: PendingCall) {
        self.calls.insert(uuid, call);
    }

    pub fn note_unknown(&mut self) {
        self.unknown_dropped += 1;
    }

    pub fn unknown_dropped(&self) -> u64 {
        self.unknown_dropped
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }
}
