use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::peers::ReplicaId;
use crate::replica::WriteAheadLogEntry;
use crate::transport::TransportError;
use bytes::Bytes;
use std::io;

#[derive(Debug)]
pub(crate) struct EnqueueForReplicationInput {
    pub(crate) data: Bytes,
}

#[derive(Debug)]
pub(crate) struct EnqueueForReplicationOutput {
    pub(crate) enqueued_term: Term,
    pub(crate) enqueued_index: Index,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum EnqueueForReplicationError {
    #[error("I'm not leader. Last known leader: {0:?}")]
    NotLeader(Option<ReplicaId>),

    #[error("Failed to persist log")]
    LocalIoError(io::Error),

    #[error("Replica actor has exited")]
    ActorExited,
}

#[derive(Debug, Clone)]
pub(crate) struct RequestVoteInput {
    pub(crate) candidate_term: Term,
    pub(crate) candidate_id: ReplicaId,
    pub(crate) candidate_last_log_entry: Option<(Term, Index)>,
}

/// A candidate with an out of date term gets a regular "not granted" answer carrying our term, so
/// it can step down.
#[derive(Debug, PartialEq)]
pub(crate) struct RequestVoteOutput {
    pub(crate) term: Term,
    pub(crate) vote_granted: bool,
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum RequestVoteError {
    #[error("Requesting candidate is not in the cluster")]
    CandidateNotInCluster,
    #[error("We (server) had an IO failure: {0:?}")]
    ServerIoError(io::Error),
    #[error("We (server) are unavailable because actor has exited")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesInput {
    pub(crate) leader_term: Term,
    pub(crate) leader_id: ReplicaId,
    // "Previous log entry" is the log entry immediately preceding the new ones in AppendEntriesInput.
    pub(crate) leader_previous_log_entry: Option<(Term, Index)>,
    pub(crate) leader_commit_index: Option<Index>,
    pub(crate) new_entries: Vec<WriteAheadLogEntry>,
}

#[derive(Debug, PartialEq)]
pub(crate) struct AppendEntriesOutput {
    // Nothing
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum AppendEntriesError {
    #[error("Client is not in cluster")]
    ClientNotInCluster,
    #[error("Client's term is out of date")]
    ClientTermOutOfDate(TermOutOfDateInfo),
    #[error("We (server) are missing previous log entry")]
    ServerMissingPreviousLogEntry(ConflictHint),
    #[error("We (server) had an IO failure: {0:?}")]
    ServerIoError(io::Error),
    #[error("We (server) are unavailable because actor has exited")]
    ActorExited,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TermOutOfDateInfo {
    pub(crate) current_term: Term,
}

/// ConflictHint lets a leader skip back over a whole term of mismatched entries at once instead
/// of one index per round trip.
///
/// - Our log is too short: `conflict_term` is None, `conflict_index` is our last index + 1.
/// - Our entry at prevLogIndex has the wrong term: `conflict_term` is that term, `conflict_index`
///   is the first index we hold with that term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ConflictHint {
    pub(crate) conflict_term: Option<Term>,
    pub(crate) conflict_index: Option<Index>,
}

// ------- What a peer answered, as seen by the caller --------

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RequestVoteReply {
    pub(crate) term: Term,
    pub(crate) vote_granted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AppendEntriesReply {
    Success,
    StaleTerm { current_term: Term },
    MissingPreviousLogEntry(ConflictHint),
}

#[derive(Debug)]
pub(crate) struct RequestVoteReplyFromPeer {
    pub(crate) peer_id: ReplicaId,
    // Term of the election the request was sent for.
    pub(crate) term: Term,
    pub(crate) result: Result<RequestVoteReply, TransportError>,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeer {
    pub(crate) descriptor: AppendEntriesReplyFromPeerDescriptor,
    pub(crate) result: Result<AppendEntriesReply, TransportError>,
}

// This is basically info about the original request
#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeerDescriptor {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
    pub(crate) seq_no: u64,
    pub(crate) previous_log_entry_index: Option<Index>,
    pub(crate) num_log_entries: usize,
}

// ------- Timer events --------

/// LeaderTimerTick contains info for a single tick of a leader's per-peer timer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LeaderTimerTick {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
}

/// FollowerTimeoutTick fires when a follower (or candidate) hasn't heard from a leader in time.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FollowerTimeoutTick {
    pub(crate) term: Term,
}
