//! The Raft log and its entries.
//!
//! Entries live in a map keyed by index. Indices are 1-based and dense up
//! to `last_index`; within a single AppendEntries batch entries may arrive
//! out of order, so insertion tracks the running maximum rather than
//! assuming sequence.

use crate::types::{LogIndex, Term};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One replicated entry of the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position of this entry in the log (1-based).
    pub index: LogIndex,
    /// The term when the entry was received by the leader.
    pub term: Term,
    /// Opaque client payload.
    pub payload: String,
}

impl LogEntry {
    pub fn new(index: LogIndex, term: Term, payload: impl Into<String>) -> Self {
        Self { index, term, payload: payload.into() }
    }
}

/// The Raft log, storing all entries for the lifetime of the process.
#[derive(Debug, Default)]
pub struct RaftLog {
    entries: BTreeMap<LogIndex, LogEntry>,
    last_index: LogIndex,
    last_term: Term,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the last log entry (0 when empty).
    pub fn last_index(&self) -> LogIndex {
        self.last_index
    }

    /// Term of the last log entry (0 when empty).
    pub fn last_term(&self) -> Term {
        self.last_term
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the entry stored at `index`.
    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        self.entries.get(&index)
    }

    /// Term at a specific index; index 0 is the term before the log.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        self.get(index).map(|e| e.term)
    }

    /// Check that our log agrees with the leader's at the given point.
    pub fn matches(&self, prev_log_index: LogIndex, prev_log_term: Term) -> bool {
        if prev_log_index == 0 {
            return true;
        }
        match self.term_at(prev_log_index) {
            Some(term) => term == prev_log_term,
            None => false,
        }
    }

    /// Insert an entry, tolerating out-of-order arrival within a batch.
    pub fn insert(&mut self, entry: LogEntry) {
        if entry.index >= self.last_index {
            self.last_index = entry.index;
            self.last_term = entry.term;
        }
        self.entries.insert(entry.index, entry);
    }

    /// Append a fresh entry after the current tail (leader side).
    pub fn append_local(&mut self, term: Term, payload: String) -> LogIndex {
        let index = self.last_index + 1;
        self.insert(LogEntry { index, term, payload });
        index
    }

    /// Delete all entries at indices `>= index` and recompute the tail.
    /// Used when a conflicting entry arrives from the leader.
    pub fn truncate_from(&mut self, index: LogIndex) {
        self.entries.split_off(&index);
        self.last_index = index.saturating_sub(1);
        self.last_term = self.term_at(self.last_index).unwrap_or(0);
    }

    /// All entries from `start` to the tail, in index order.
    pub fn entries_from(&self, start: LogIndex) -> Vec<LogEntry> {
        self.entries.range(start..).map(|(_, e)| e.clone()).collect()
    }

    /// Check if a candidate's log is at least as up-to-date as ours:
    /// compare last terms first, then last indices.
    pub fn is_up_to_date(&self, last_log_index: LogIndex, last_log_term: Term) -> bool {
        if last_log_term != self.last_term {
            last_log_term > self.last_term
        } else {
            last_log_index >= self.last_index
        }
    }
}
