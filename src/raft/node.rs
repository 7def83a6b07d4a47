//! The Raft state machine: role transitions, elections, replication,
//! commit advancement, and client-entry application.
//!
//! The role is a tagged variant over one shared context struct; a
//! transition replaces only the variant and never copies persistent state
//! around. A single mutex covers the whole context, including the
//! pending-RPC registry: RPC handlers, the tick driver, and role
//! transitions all run under it, and the only I/O performed while holding
//! it is a non-blocking enqueue to the outbound queue.

use super::log::{LogEntry, RaftLog};
use super::pending::{PendingRpcs, ReplyAction};
use super::rpc::{AppendEntriesArgs, RaftMessage, RequestVoteArgs, RpcResult};
use crate::config::RaftTiming;
use crate::net::OutboundQueue;
use crate::types::{quorum, LogIndex, PeerId, Term};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upward interface receiving committed entries, in index order, exactly
/// once each.
pub trait ClientSink: Send + Sync {
    fn deliver(&self, payload: &str);
}

/// Current role of the node. The surrounding [`RaftCore`] holds everything
/// that survives a transition.
#[derive(Debug)]
enum Role {
    Follower,
    Candidate {
        /// Granted votes for the current term, own vote included.
        votes: usize,
    },
    Leader {
        /// Next log index to send to each peer.
        next_index: HashMap<PeerId, LogIndex>,
        /// Highest log index known replicated on each peer.
        match_index: HashMap<PeerId, LogIndex>,
        last_heartbeat: Instant,
    },
}

struct RaftCore {
    id: PeerId,
    peer_count: usize,
    timing: RaftTiming,

    // Persistent across role transitions within a run
    current_term: Term,
    voted_for: Option<PeerId>,
    log: RaftLog,

    // Volatile
    commit_index: LogIndex,
    last_applied: LogIndex,
    leader_id: Option<PeerId>,
    should_become_follower: bool,
    role: Role,

    pending: PendingRpcs,
    /// Client payloads accepted while no leader is known.
    buffered_entries: Vec<String>,
    election_deadline: Instant,

    outbound: OutboundQueue,
    sink: Arc<dyn ClientSink>,
}

impl RaftCore {
    fn new(
        id: PeerId,
        peer_count: usize,
        timing: RaftTiming,
        outbound: OutboundQueue,
        sink: Arc<dyn ClientSink>,
    ) -> Self {
        let election_deadline = Instant::now() + random_timeout(&timing);
        Self {
            id,
            peer_count,
            timing,
            current_term: 0,
            voted_for: None,
            log: RaftLog::new(),
            commit_index: 0,
            last_applied: 0,
            leader_id: None,
            should_become_follower: false,
            role: Role::Follower,
            pending: PendingRpcs::default(),
            buffered_entries: Vec::new(),
            election_deadline,
            outbound,
            sink,
        }
    }

    fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        (0..self.peer_count as PeerId).filter(move |p| *p != self.id)
    }

    fn quorum(&self) -> usize {
        quorum(self.peer_count)
    }

    fn reset_election_deadline(&mut self) {
        self.election_deadline = Instant::now() + random_timeout(&self.timing);
    }

    /// Adopt a higher term seen in an RPC. The actual demotion happens at
    /// the next [`Self::settle`] before the lock is released.
    fn yield_to(&mut self, term: Term) {
        debug!(id = self.id, old_term = self.current_term, new_term = term, "observed higher term");
        self.should_become_follower = true;
        self.current_term = term;
        self.voted_for = None;
        // Whoever led the old term is stale; a valid AppendEntries will
        // teach us the new leader.
        self.leader_id = None;
    }

    /// Honor a pending demotion. Called at the end of every handler and
    /// tick so the flag never lingers across a lock release.
    fn settle(&mut self) {
        if self.should_become_follower {
            self.become_follower();
        }
    }

    fn become_follower(&mut self) {
        info!(id = self.id, term = self.current_term, "becoming follower");
        self.role = Role::Follower;
        self.should_become_follower = false;
        self.reset_election_deadline();
    }

    fn start_election(&mut self) {
        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.role = Role::Candidate { votes: 1 };
        self.leader_id = None;
        self.reset_election_deadline();

        info!(id = self.id, term = self.current_term, "election timeout, starting election");

        if 1 >= self.quorum() {
            // Single-node cluster: our own vote is the majority.
            self.become_leader();
            return;
        }

        let uuid = Uuid::new_v4().to_string();
        self.pending.register(
            uuid.clone(),
            self.peer_count - 1,
            ReplyAction::ElectionTally { term: self.current_term },
        );
        let message = RaftMessage::RequestVote {
            uuid,
            args: RequestVoteArgs {
                term: self.current_term,
                candidate_id: self.id,
                last_log_index: self.log.last_index(),
                last_log_term: self.log.last_term(),
            },
        };
        self.broadcast_raft(&message);
    }

    fn become_leader(&mut self) {
        info!(id = self.id, term = self.current_term, "won election, becoming leader");
        let next = self.log.last_index() + 1;
        let next_index = self.peers().map(|p| (p, next)).collect();
        let match_index = self.peers().map(|p| (p, 0)).collect();
        self.role = Role::Leader { next_index, match_index, last_heartbeat: Instant::now() };
        self.leader_id = Some(self.id);

        // Entries accepted while leaderless now belong in our own log.
        for payload in std::mem::take(&mut self.buffered_entries) {
            self.log.append_local(self.current_term, payload);
        }

        // Announce leadership with an immediate empty heartbeat to all
        // peers under one correlation id.
        let uuid = Uuid::new_v4().to_string();
        self.pending.register(
            uuid.clone(),
            self.peer_count - 1,
            ReplyAction::Replication { term: self.current_term },
        );
        let message = RaftMessage::AppendEntries {
            uuid,
            args: AppendEntriesArgs {
                term: self.current_term,
                leader_id: self.id,
                prev_log_index: self.log.last_index(),
                prev_log_term: self.log.last_term(),
                entries: Vec::new(),
                leader_commit: self.commit_index,
            },
        };
        self.broadcast_raft(&message);
    }

    // RPC handlers

    fn handle_append_entries(&mut self, uuid: String, args: AppendEntriesArgs) {
        let result = if args.term < self.current_term {
            debug!(id = self.id, term = args.term, "rejecting AppendEntries from stale term");
            RpcResult::failure(self.id, self.current_term, self.log.last_index())
        } else {
            if args.term > self.current_term {
                self.yield_to(args.term);
            } else if matches!(self.role, Role::Candidate { .. }) {
                // Another candidate won this term.
                self.should_become_follower = true;
            }

            // Valid leader contact suppresses our own election.
            self.reset_election_deadline();

            if self.leader_id != Some(args.leader_id) {
                debug!(id = self.id, leader = args.leader_id, "new leader");
                self.leader_id = Some(args.leader_id);
                self.flush_buffered();
            }

            if !self.log.matches(args.prev_log_index, args.prev_log_term) {
                warn!(
                    id = self.id,
                    prev_log_index = args.prev_log_index,
                    prev_log_term = args.prev_log_term,
                    "rejecting AppendEntries due to inconsistent log"
                );
                RpcResult::failure(self.id, self.current_term, self.log.last_index())
            } else {
                // An entry whose term disagrees with ours invalidates our
                // whole suffix from that index on.
                for entry in &args.entries {
                    let existing_term = self.log.get(entry.index).map(|e| e.term);
                    if let Some(ours) = existing_term {
                        if ours != entry.term {
                            warn!(
                                id = self.id,
                                index = entry.index,
                                ours,
                                theirs = entry.term,
                                "conflicting entry, truncating log"
                            );
                            self.log.truncate_from(entry.index);
                        }
                    }
                }

                for entry in args.entries {
                    debug!(id = self.id, index = entry.index, "appending entry");
                    self.log.insert(entry);
                }

                let new_commit = args.leader_commit.min(self.log.last_index());
                if new_commit > self.commit_index {
                    self.commit_index = new_commit;
                    debug!(id = self.id, commit_index = new_commit, "follower advanced commit index");
                }

                RpcResult::success(self.id, self.current_term, self.log.last_index())
            }
        };

        self.send_raft(&RaftMessage::Result { uuid, result }, args.leader_id);
    }

    fn handle_request_vote(&mut self, uuid: String, args: RequestVoteArgs) {
        let result = if args.term < self.current_term {
            RpcResult::failure(self.id, self.current_term, self.log.last_index())
        } else {
            if args.term > self.current_term {
                self.yield_to(args.term);
            }

            let may_vote = self.voted_for.map_or(true, |v| v == args.candidate_id);
            if may_vote && self.log.is_up_to_date(args.last_log_index, args.last_log_term) {
                debug!(
                    id = self.id,
                    candidate = args.candidate_id,
                    term = self.current_term,
                    "granting vote"
                );
                self.voted_for = Some(args.candidate_id);
                self.reset_election_deadline();
                RpcResult::success(self.id, self.current_term, self.log.last_index())
            } else {
                RpcResult::failure(self.id, self.current_term, self.log.last_index())
            }
        };

        self.send_raft(&RaftMessage::Result { uuid, result }, args.candidate_id);
    }

    fn handle_result(&mut self, uuid: String, result: RpcResult) {
        match self.pending.take(&uuid) {
            Some(mut call) => {
                match call.action {
                    ReplyAction::ElectionTally { term } => self.on_vote_reply(term, &result),
                    ReplyAction::Replication { term } => self.on_replication_reply(term, &result),
                }
                call.remaining -= 1;
                if call.remaining > 0 {
                    self.pending.put_back(uuid, call);
                }
            }
            None => {
                // Straggler reply after deregistration.
                self.pending.note_unknown();
            }
        }

        if result.term > self.current_term {
            self.yield_to(result.term);
        }
    }

    fn on_vote_reply(&mut self, issued_term: Term, result: &RpcResult) {
        // The call-site snapshot must still hold.
        if issued_term != self.current_term {
            return;
        }
        let won = match &mut self.role {
            Role::Candidate { votes } if result.success => {
                *votes += 1;
                debug!(id = self.id, voter = result.src, votes = *votes, "received vote");
                *votes >= quorum(self.peer_count)
            }
            _ => false,
        };
        if won {
            self.become_leader();
        }
    }

    fn on_replication_reply(&mut self, issued_term: Term, result: &RpcResult) {
        if issued_term != self.current_term {
            return;
        }
        let replicated = {
            let Role::Leader { next_index, match_index, .. } = &mut self.role else {
                return;
            };
            if result.success {
                match_index.insert(result.src, result.last_log_index);
                next_index.insert(result.src, result.last_log_index + 1);
                true
            } else {
                // The follower's log disagrees; probe one entry earlier on
                // the next heartbeat.
                let next = next_index.entry(result.src).or_insert(1);
                *next = next.saturating_sub(1).max(1);
                debug!(id = self.id, peer = result.src, next = *next, "replication rejected, backing off");
                false
            }
        };
        if replicated {
            self.advance_commit();
        }
    }

    /// A client payload enters here, whether submitted locally or forwarded
    /// by a peer.
    fn accept_entry(&mut self, payload: String) {
        if matches!(self.role, Role::Leader { .. }) {
            let index = self.log.append_local(self.current_term, payload);
            debug!(id = self.id, index, "leader accepted client entry");
        } else if let Some(leader) = self.leader_id {
            let message = RaftMessage::ClientEntry { uuid: Uuid::new_v4().to_string(), payload };
            self.send_raft(&message, leader);
        } else {
            debug!(id = self.id, "no known leader, buffering client entry");
            self.buffered_entries.push(payload);
        }
    }

    fn flush_buffered(&mut self) {
        if self.buffered_entries.is_empty() {
            return;
        }
        let Some(leader) = self.leader_id else { return };
        for payload in std::mem::take(&mut self.buffered_entries) {
            let message = RaftMessage::ClientEntry { uuid: Uuid::new_v4().to_string(), payload };
            self.send_raft(&message, leader);
        }
    }

    // Tick driver

    fn tick(&mut self) {
        self.settle();
        self.apply_committed();

        let now = Instant::now();
        let heartbeat_due = match &mut self.role {
            Role::Leader { last_heartbeat, .. }
                if now.duration_since(*last_heartbeat) >= self.timing.heartbeat_interval() =>
            {
                *last_heartbeat = now;
                true
            }
            _ => false,
        };
        if heartbeat_due {
            self.replicate_all();
        }

        let election_due =
            !matches!(self.role, Role::Leader { .. }) && now >= self.election_deadline;
        if election_due {
            self.start_election();
        }

        self.settle();
    }

    /// Send each peer the entries it is missing (or an empty heartbeat).
    fn replicate_all(&mut self) {
        let plans: Vec<(PeerId, LogIndex)> = {
            let Role::Leader { next_index, .. } = &self.role else { return };
            self.peers()
                .map(|p| (p, next_index.get(&p).copied().unwrap_or(1)))
                .collect()
        };

        for (peer, next) in plans {
            let prev_log_index = next.saturating_sub(1);
            let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);
            let entries = self.log.entries_from(next);

            let uuid = Uuid::new_v4().to_string();
            self.pending.register(
                uuid.clone(),
                1,
                ReplyAction::Replication { term: self.current_term },
            );
            let message = RaftMessage::AppendEntries {
                uuid,
                args: AppendEntriesArgs {
                    term: self.current_term,
                    leader_id: self.id,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: self.commit_index,
                },
            };
            self.send_raft(&message, peer);
        }
    }

    /// Leader commit rule: advance to the highest index replicated on a
    /// quorum whose entry carries the current term.
    fn advance_commit(&mut self) {
        let candidate = {
            let Role::Leader { match_index, .. } = &self.role else { return };
            let mut indices: Vec<LogIndex> = match_index.values().copied().collect();
            indices.push(self.log.last_index());
            indices.sort_unstable();
            indices.reverse();
            match indices.get(self.quorum() - 1) {
                Some(&idx) => idx,
                None => return,
            }
        };

        let mut idx = candidate;
        while idx > self.commit_index {
            if self.log.term_at(idx) == Some(self.current_term) {
                self.commit_index = idx;
                debug!(id = self.id, commit_index = idx, "leader advanced commit index");
                break;
            }
            idx -= 1;
        }
    }

    /// Deliver committed entries upward, in index order, exactly once.
    fn apply_committed(&mut self) {
        while self.commit_index > self.last_applied {
            self.last_applied += 1;
            match self.log.get(self.last_applied) {
                Some(entry) => {
                    debug!(id = self.id, index = self.last_applied, "applying committed entry");
                    self.sink.deliver(&entry.payload);
                }
                None => {
                    // Dense-index invariant violated; stop rather than skip.
                    warn!(id = self.id, index = self.last_applied, "committed entry missing from log");
                    self.last_applied -= 1;
                    break;
                }
            }
        }
    }

    // Communication helpers

    fn send_raft(&self, message: &RaftMessage, dest: PeerId) {
        match message.encode() {
            Ok(payload) => self.outbound.send(payload, dest),
            Err(e) => warn!(id = self.id, error = %e, "failed to encode rpc message"),
        }
    }

    fn broadcast_raft(&self, message: &RaftMessage) {
        match message.encode() {
            Ok(payload) => self.outbound.broadcast(payload),
            Err(e) => warn!(id = self.id, error = %e, "failed to encode rpc message"),
        }
    }
}

fn random_timeout(timing: &RaftTiming) -> Duration {
    let ms = rand::thread_rng()
        .gen_range(timing.election_timeout_min_ms..=timing.election_timeout_max_ms);
    Duration::from_millis(ms)
}

/// Handle to a Raft node. Cheap to clone; all state lives behind one
/// mutex shared by the I/O and tick tasks.
#[derive(Clone)]
pub struct RaftNode {
    core: Arc<Mutex<RaftCore>>,
}

impl RaftNode {
    pub fn new(
        id: PeerId,
        peer_count: usize,
        timing: RaftTiming,
        outbound: OutboundQueue,
        sink: Arc<dyn ClientSink>,
    ) -> Self {
        Self { core: Arc::new(Mutex::new(RaftCore::new(id, peer_count, timing, outbound, sink))) }
    }

    /// Dispatch one decoded inbound message under the role lock.
    pub fn handle_message(&self, message: RaftMessage) {
        let mut core = self.core.lock();
        match message {
            RaftMessage::AppendEntries { uuid, args } => core.handle_append_entries(uuid, args),
            RaftMessage::RequestVote { uuid, args } => core.handle_request_vote(uuid, args),
            RaftMessage::Result { uuid, result } => core.handle_result(uuid, result),
            RaftMessage::ClientEntry { payload, .. } => core.accept_entry(payload),
        }
        core.settle();
    }

    /// Drive timeouts, heartbeats, and commit application.
    pub fn tick(&self) {
        self.core.lock().tick();
    }

    /// Submit a client payload; non-leaders forward or buffer.
    pub fn submit(&self, payload: impl Into<String>) {
        let mut core = self.core.lock();
        core.accept_entry(payload.into());
        core.settle();
    }

    // Observers

    pub fn is_leader(&self) -> bool {
        matches!(self.core.lock().role, Role::Leader { .. })
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self.core.lock().role, Role::Candidate { .. })
    }

    pub fn is_follower(&self) -> bool {
        matches!(self.core.lock().role, Role::Follower)
    }

    pub fn current_term(&self) -> Term {
        self.core.lock().current_term
    }

    pub fn leader_id(&self) -> Option<PeerId> {
        self.core.lock().leader_id
    }

    pub fn voted_for(&self) -> Option<PeerId> {
        self.core.lock().voted_for
    }

    pub fn commit_index(&self) -> LogIndex {
        self.core.lock().commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.core.lock().last_applied
    }

    pub fn last_log_index(&self) -> LogIndex {
        self.core.lock().log.last_index()
    }

    pub fn last_log_term(&self) -> Term {
        self.core.lock().log.last_term()
    }

    pub fn log_entry(&self, index: LogIndex) -> Option<LogEntry> {
        self.core.lock().log.get(index).cloned()
    }

    /// Replies that arrived for an already-deregistered correlation id.
    pub fn unknown_results(&self) -> u64 {
        self.core.lock().pending.unknown_dropped()
    }

    /// Outbound calls still awaiting replies.
    pub fn pending_calls(&self) -> usize {
        self.core.lock().pending.len()
    }
}
