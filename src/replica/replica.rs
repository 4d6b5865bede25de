use crate::actor::WeakActorClient;
use crate::api::Persister;
use crate::commitlog::{Index, Log};
use crate::replica::election::{ElectionState, PeerState, PeerStateUpdate};
use crate::replica::local_state::{LocalState, Term};
use crate::replica::peer_rpc;
use crate::replica::peers::{ClusterTracker, ReplicaId};
use crate::replica::persistence::PersistentState;
use crate::replica::replica_api::{
    AppendEntriesError, AppendEntriesInput, AppendEntriesOutput, AppendEntriesReply, AppendEntriesReplyFromPeer,
    AppendEntriesReplyFromPeerDescriptor, ConflictHint, EnqueueForReplicationError, EnqueueForReplicationInput,
    EnqueueForReplicationOutput, FollowerTimeoutTick, LeaderTimerTick, RequestVoteError, RequestVoteInput,
    RequestVoteOutput, RequestVoteReplyFromPeer, TermOutOfDateInfo,
};
use crate::replica::write_ahead_log::{WriteAheadLog, WriteAheadLogEntry};
use crate::server::RpcServerShutdownHandle;
use crate::transport::RaftTransport;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use std::{cmp, io};

#[derive(Clone)]
pub(crate) struct ReplicaConfig {
    pub(crate) leader_heartbeat_duration: Duration,
    pub(crate) follower_min_timeout: Duration,
    pub(crate) follower_max_timeout: Duration,
    pub(crate) append_entries_timeout: Duration,
    pub(crate) request_vote_timeout: Duration,
    pub(crate) max_entries_per_append: usize,
}

/// Replica is the Raft state machine of a single cluster member. All of its methods run inside the
/// replica actor, one event at a time, and none of them await: remote calls are spawned and come
/// back later as new events.
///
/// Anything in `local_state` or `write_ahead_log` that changes is persisted before the method
/// returns a result that depends on it. A failed save leaves `unpersisted_changes` set, and every
/// later reply saves again before it is sent.
pub(crate) struct Replica<L>
where
    L: Log<WriteAheadLogEntry>,
{
    logger: slog::Logger,
    my_replica_id: ReplicaId,
    cluster_tracker: ClusterTracker,
    local_state: LocalState,
    election_state: ElectionState,
    write_ahead_log: WriteAheadLog<L>,
    persister: Box<dyn Persister>,
    unpersisted_changes: bool,
    transport: Arc<dyn RaftTransport>,
    actor_client: WeakActorClient,
    append_entries_timeout: Duration,
    request_vote_timeout: Duration,
    max_entries_per_append: usize,
    // Dropping the replica stops the RPC server, if there is one.
    _server_shutdown_handle: Option<RpcServerShutdownHandle>,
}

impl<L> Replica<L>
where
    L: Log<WriteAheadLogEntry> + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        logger: slog::Logger,
        cluster_tracker: ClusterTracker,
        local_state: LocalState,
        election_state: ElectionState,
        write_ahead_log: WriteAheadLog<L>,
        persister: Box<dyn Persister>,
        transport: Arc<dyn RaftTransport>,
        actor_client: WeakActorClient,
        config: &ReplicaConfig,
        server_shutdown_handle: Option<RpcServerShutdownHandle>,
    ) -> Self {
        Replica {
            logger,
            my_replica_id: cluster_tracker.my_replica_id().clone(),
            cluster_tracker,
            local_state,
            election_state,
            write_ahead_log,
            persister,
            unpersisted_changes: false,
            transport,
            actor_client,
            append_entries_timeout: config.append_entries_timeout,
            request_vote_timeout: config.request_vote_timeout,
            max_entries_per_append: config.max_entries_per_append,
            _server_shutdown_handle: server_shutdown_handle,
        }
    }

    fn persist(&mut self) -> Result<(), io::Error> {
        self.unpersisted_changes = true;

        let (current_term, voted_for) = self.local_state.voted_for_current_term();
        let state = PersistentState {
            current_term,
            voted_for: voted_for.cloned(),
            entries: self.write_ahead_log.all_entries()?,
        };
        self.persister.save(state.encode())?;

        self.unpersisted_changes = false;
        Ok(())
    }

    /// Saves if `changed`, or if an earlier save failed and memory is still ahead of storage.
    fn persist_if_changed(&mut self, changed: bool) -> Result<(), io::Error> {
        if changed || self.unpersisted_changes {
            self.persist()
        } else {
            Ok(())
        }
    }

    pub(crate) fn handle_enqueue_for_replication(
        &mut self,
        input: EnqueueForReplicationInput,
    ) -> Result<EnqueueForReplicationOutput, EnqueueForReplicationError> {
        if !self.election_state.is_leader() {
            return Err(EnqueueForReplicationError::NotLeader(
                self.election_state.known_leader().cloned(),
            ));
        }

        // > If command received from client: append entry to local log,
        // > respond after entry applied to state machine (§5.3)
        let term = self.local_state.current_term();
        let appended_index = self
            .write_ahead_log
            .append(WriteAheadLogEntry { term, data: input.data })
            .map_err(EnqueueForReplicationError::LocalIoError)?;

        if let Err(e) = self.persist() {
            slog::error!(self.logger, "Failed to persist new entry {:?}: {:?}", appended_index, e);
            // Nobody has seen the entry yet, so it is safe to take it back.
            if let Err(te) = self.write_ahead_log.truncate(appended_index) {
                slog::error!(self.logger, "Failed to remove unpersisted entry {:?}: {:?}", appended_index, te);
            }
            return Err(EnqueueForReplicationError::LocalIoError(e));
        }

        // Replicate eagerly instead of waiting for the next heartbeat. Peers with a request in
        // flight pick the entry up when that request completes.
        let peer_ids: Vec<ReplicaId> = self.cluster_tracker.iter_peer_ids().cloned().collect();
        for peer_id in peer_ids {
            self.replicate_to_peer_and_log(&peer_id, term);
        }

        // Only has an effect in a single member cluster.
        self.try_advance_commit_index();

        Ok(EnqueueForReplicationOutput {
            enqueued_term: term,
            enqueued_index: appended_index,
        })
    }

    pub(crate) fn server_handle_request_vote(
        &mut self,
        input: RequestVoteInput,
    ) -> Result<RequestVoteOutput, RequestVoteError> {
        // Ensure candidate is known member.
        if !self.cluster_tracker.contains_member(&input.candidate_id) {
            return Err(RequestVoteError::CandidateNotInCluster);
        }

        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        if input.candidate_term < current_term {
            slog::info!(
                self.logger,
                "Not granting vote to {:?}. Candidate term {:?} is out of date.",
                input.candidate_id,
                input.candidate_term
            );
            self.persist_if_changed(false)
                .map_err(RequestVoteError::ServerIoError)?;
            return Ok(RequestVoteOutput {
                term: current_term,
                vote_granted: false,
            });
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        let term_increased = self.local_state.store_term_if_increased(input.candidate_term);
        if term_increased {
            self.election_state.transition_to_follower(input.candidate_term, None);
            slog::info!(
                self.logger,
                "Observed increased term in RequestVote call. Election state: {:?}",
                self.election_state
            );
        }

        // 2. If votedFor is null or candidateId, and candidate’s log is at
        // least as up-to-date as receiver’s log, grant vote (§5.2, §5.4).
        let vote_granted = self.decide_vote(&input);

        self.persist_if_changed(term_increased || vote_granted)
            .map_err(RequestVoteError::ServerIoError)?;

        if vote_granted {
            self.election_state.reset_timeout_if_follower();
        }

        Ok(RequestVoteOutput {
            term: self.local_state.current_term(),
            vote_granted,
        })
    }

    fn decide_vote(&mut self, input: &RequestVoteInput) -> bool {
        // If votedFor is null or candidateId, and...
        if let (_, Some(voted_for)) = self.local_state.voted_for_current_term() {
            if *voted_for != input.candidate_id {
                slog::info!(self.logger, "Not granting vote. We already voted for {:?}.", voted_for);
                return false;
            }
        }

        // ...and candidate’s log is at least as up-to-date as receiver’s log...
        if !self.is_candidate_log_gte_mine(input.candidate_last_log_entry) {
            slog::info!(
                self.logger,
                "Not granting vote to {:?}. Candidate log {:?} is behind ours {:?}.",
                input.candidate_id,
                input.candidate_last_log_entry,
                self.write_ahead_log.latest_entry()
            );
            return false;
        }

        // ...grant vote
        let stored = self
            .local_state
            .store_vote_for_term_if_unvoted(input.candidate_term, &input.candidate_id);
        if stored {
            slog::info!(
                self.logger,
                "Voting for {:?} in term {:?}.",
                input.candidate_id,
                input.candidate_term
            );
        }

        stored
    }

    fn is_candidate_log_gte_mine(&self, candidate_last_entry: Option<(Term, Index)>) -> bool {
        // > Raft determines which of two logs is more up-to-date
        // > by comparing the index and term of the last entries in the
        // > logs. If the logs have last entries with different terms, then
        // > the log with the later term is more up-to-date. If the logs
        // > end with the same term, then whichever log is longer is
        // > more up-to-date.
        match (self.write_ahead_log.latest_entry(), candidate_last_entry) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(candidate)) => candidate >= mine,
        }
    }

    pub(crate) fn handle_request_vote_reply_from_peer(&mut self, reply: RequestVoteReplyFromPeer) {
        let logger = self.logger.new(slog::o!("Peer" => format!("{:?}", reply.peer_id)));

        let vote_reply = match reply.result {
            Ok(vote_reply) => vote_reply,
            Err(e) => {
                // Not retried. If the election doesn't succeed, the election timer starts a new one.
                slog::info!(logger, "RequestVote for term {:?} failed: {}", reply.term, e);
                return;
            }
        };

        if self.local_state.store_term_if_increased(vote_reply.term) {
            self.election_state.transition_to_follower(vote_reply.term, None);
            slog::info!(
                logger,
                "Observed increased term in RequestVote reply. Election state: {:?}",
                self.election_state
            );
            if let Err(e) = self.persist() {
                slog::error!(logger, "Failed to persist term {:?}: {:?}", vote_reply.term, e);
            }
            return;
        }

        let current_term = self.local_state.current_term();
        if current_term != reply.term {
            slog::info!(
                logger,
                "Received vote for outdated term {:?}, current term: {:?}.",
                reply.term,
                current_term,
            );
            return;
        }

        if !vote_reply.vote_granted {
            slog::info!(logger, "Vote not granted for term {:?}", reply.term);
            return;
        }

        let num_votes_received = match self.election_state.add_vote_if_candidate(reply.peer_id) {
            Some(v) => v,
            None => {
                slog::info!(
                    logger,
                    "Received vote for term {:?} after transitioning to election state: {:?}",
                    reply.term,
                    self.election_state,
                );
                return;
            }
        };

        slog::info!(
            logger,
            "Received {}/{} votes for term {:?}",
            num_votes_received,
            self.cluster_tracker.num_voting_replicas(),
            reply.term,
        );

        if num_votes_received >= self.cluster_tracker.quorum_size() {
            self.become_leader(reply.term);
        }
    }

    fn become_leader(&mut self, term: Term) {
        self.election_state
            .transition_to_leader(term, self.cluster_tracker.peer_ids(), self.write_ahead_log.latest_index());
        slog::info!(
            self.logger,
            "Won election. Election state: {:?}, Latest log entry: {:?}",
            self.election_state,
            self.write_ahead_log.latest_entry()
        );
    }

    pub(crate) fn server_handle_append_entries(
        &mut self,
        input: AppendEntriesInput,
    ) -> Result<AppendEntriesOutput, AppendEntriesError> {
        // Ensure leader is known member.
        if !self.cluster_tracker.contains_member(&input.leader_id) {
            return Err(AppendEntriesError::ClientNotInCluster);
        }

        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        if input.leader_term < current_term {
            self.persist_if_changed(false)
                .map_err(AppendEntriesError::ServerIoError)?;
            return Err(AppendEntriesError::ClientTermOutOfDate(TermOutOfDateInfo {
                current_term,
            }));
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        // A candidate that hears from the leader of its own term also steps down.
        let term_increased = self.local_state.store_term_if_increased(input.leader_term);
        if term_increased || !self.election_state.is_follower() {
            self.election_state
                .transition_to_follower(input.leader_term, Some(input.leader_id.clone()));
            slog::info!(
                self.logger,
                "Following new leader. Election state: {:?}",
                self.election_state
            );
        } else {
            self.election_state.set_leader_if_unknown(&input.leader_id);
        }

        self.election_state.reset_timeout_if_follower();

        let leader_commit_index = input.leader_commit_index;
        let index_of_last_new_entry = match (input.leader_previous_log_entry, input.new_entries.len()) {
            (None, 0) => None,
            (None, n) => Some(Index::new_usize(n)),
            (Some((_, previous_index)), n) => Some(previous_index.plus(n as u64)),
        };

        let mut dirty = term_increased;
        let reconcile_result = self.reconcile_log(input, &mut dirty);
        self.persist_if_changed(dirty)
            .map_err(AppendEntriesError::ServerIoError)?;
        reconcile_result?;

        // 5. If leaderCommit > commitIndex, set commitIndex =
        // min(leaderCommit, index of last new entry)
        if let (Some(leader_commit_index), Some(index_of_last_new_entry)) =
            (leader_commit_index, index_of_last_new_entry)
        {
            let new_commit_index = cmp::min(leader_commit_index, index_of_last_new_entry);
            if self.write_ahead_log.ratchet_fwd_commit_index(new_commit_index) {
                slog::info!(self.logger, "Commit index advanced to {:?}", new_commit_index);
            }
        }

        // > If commitIndex > lastApplied: increment lastApplied, apply
        // > log[lastApplied] to state machine (§5.3)
        self.write_ahead_log.apply_all_committed_entries();

        Ok(AppendEntriesOutput {})
    }

    /// Steps 2-4 of the AppendEntries receiver. Sets `dirty` if the log changed, even when it
    /// fails part way through.
    fn reconcile_log(&mut self, input: AppendEntriesInput, dirty: &mut bool) -> Result<(), AppendEntriesError> {
        // 2. Reply false if [my] log doesn't contain an entry at [leader's]
        // prevLogIndex whose term matches [leader's] prevLogTerm (§5.3)
        if let Some((leader_prev_entry_term, leader_prev_entry_index)) = input.leader_previous_log_entry {
            let my_previous_log_entry = self
                .write_ahead_log
                .read(leader_prev_entry_index)
                .map_err(AppendEntriesError::ServerIoError)?;

            match my_previous_log_entry {
                Some(entry) if entry.term == leader_prev_entry_term => { /* consistent */ }
                Some(entry) => {
                    let conflict_index = self
                        .write_ahead_log
                        .first_index_of_term_at(leader_prev_entry_index)
                        .map_err(AppendEntriesError::ServerIoError)?;
                    return Err(AppendEntriesError::ServerMissingPreviousLogEntry(ConflictHint {
                        conflict_term: Some(entry.term),
                        conflict_index: Some(conflict_index),
                    }));
                }
                None => {
                    let conflict_index = self
                        .write_ahead_log
                        .latest_index()
                        .map(|index| index.plus(1))
                        .unwrap_or_else(Index::start_index);
                    return Err(AppendEntriesError::ServerMissingPreviousLogEntry(ConflictHint {
                        conflict_term: None,
                        conflict_index: Some(conflict_index),
                    }));
                }
            }
        }

        // 3. If [my] existing entry conflicts with [leader's new entries]
        // (same index but different terms), delete [my] existing entry and
        // all that follow it (§5.3)
        // 4. Append any new entries not already in the log
        let mut next_entry_index = match input.leader_previous_log_entry {
            None => Index::start_index(),
            Some((_, leader_prev_entry_index)) => leader_prev_entry_index.plus(1),
        };
        for new_entry in input.new_entries {
            let opt_existing_entry = self
                .write_ahead_log
                .read(next_entry_index)
                .map_err(AppendEntriesError::ServerIoError)?;

            match opt_existing_entry {
                // 4. (already have it)
                Some(existing_entry) if existing_entry.term == new_entry.term => {
                    next_entry_index = next_entry_index.plus(1);
                    continue;
                }
                // 3. (delete)
                Some(_) => {
                    self.write_ahead_log
                        .truncate(next_entry_index)
                        .map_err(AppendEntriesError::ServerIoError)?;
                    *dirty = true;
                }
                None => {}
            }

            // 4. (append)
            let appended_index = self
                .write_ahead_log
                .append(new_entry)
                .map_err(AppendEntriesError::ServerIoError)?;
            *dirty = true;
            assert_eq!(
                appended_index, next_entry_index,
                "Appended log entry to unexpected index."
            );

            next_entry_index = next_entry_index.plus(1);
        }

        Ok(())
    }

    pub(crate) fn handle_append_entries_reply_from_peer(&mut self, reply: AppendEntriesReplyFromPeer) {
        let descriptor = reply.descriptor;
        let logger = self
            .logger
            .new(slog::o!("Peer" => format!("{:?}", descriptor.peer_id), "SeqNo" => descriptor.seq_no));
        slog::debug!(logger, "AE reply from peer result: {:?}", reply.result);

        // A higher term always wins, even when it arrives on a reply to an old request.
        if let Ok(AppendEntriesReply::StaleTerm { current_term: peer_term }) = &reply.result {
            if self.local_state.store_term_if_increased(*peer_term) {
                self.election_state.transition_to_follower(*peer_term, None);
                slog::info!(
                    logger,
                    "Rejected by peer because my term is stale. Election state: {:?}",
                    self.election_state
                );
                if let Err(e) = self.persist() {
                    slog::error!(logger, "Failed to persist term {:?}: {:?}", peer_term, e);
                }
                return;
            }
        }

        let current_term = self.local_state.current_term();
        if current_term != descriptor.term {
            slog::info!(
                logger,
                "Received AE reply for outdated term {:?}, but we're on term {:?}",
                descriptor.term,
                current_term
            );
            return;
        }

        // 1. Translate the reply into what it means for the peer's log.
        let peer_log_update = match reply.result {
            Ok(AppendEntriesReply::Success) => PeerStateUpdate::Success {
                previous_log_entry: descriptor.previous_log_entry_index,
                num_entries_replicated: descriptor.num_log_entries,
            },
            Ok(AppendEntriesReply::StaleTerm { current_term: peer_term }) => {
                slog::warn!(
                    logger,
                    "Peer claims our term is stale, but its term {:?} isn't higher. Treating as generic failure.",
                    peer_term
                );
                PeerStateUpdate::OtherError
            }
            Ok(AppendEntriesReply::MissingPreviousLogEntry(hint)) => {
                let suggested_next = self.suggested_next_index(&logger, hint, descriptor.previous_log_entry_index);
                slog::info!(
                    logger,
                    "Peer is missing previous log entry {:?}. Hint: {:?}. Backing off to {:?}",
                    descriptor.previous_log_entry_index,
                    hint,
                    suggested_next
                );
                PeerStateUpdate::PeerLogBehind { suggested_next }
            }
            Err(e) => {
                slog::info!(logger, "AE failure: {}", e);
                PeerStateUpdate::OtherError
            }
        };
        let follow_up = !matches!(peer_log_update, PeerStateUpdate::OtherError);

        // 2. Update peer log tracker
        let leader_state = match self.election_state.leader_state_mut() {
            Some(leader_state) => leader_state,
            None => {
                slog::info!(logger, "No longer leader");
                return;
            }
        };
        let peer_state = match leader_state.peer_state_mut(&descriptor.peer_id) {
            Some(peer_state) => peer_state,
            None => {
                slog::warn!(logger, "Peer not found while handling AE reply");
                return;
            }
        };
        if !peer_state.handle_append_entries_result(&logger, descriptor.seq_no, peer_log_update) {
            return;
        }
        let (next_index, _) = peer_state.next_and_previous_log_index();

        // 3. Check for majority replication and apply new commits.
        self.try_advance_commit_index();

        // 4. Keep going while the peer is behind.
        // > If last log index ≥ nextIndex for a follower: send
        // > AppendEntries RPC with log entries starting at nextIndex
        if follow_up && matches!(self.write_ahead_log.latest_index(), Some(latest) if latest >= next_index) {
            self.replicate_to_peer_and_log(&descriptor.peer_id, current_term);
        }
    }

    /// Where to retry a peer that rejected our previous log entry.
    fn suggested_next_index(
        &self,
        logger: &slog::Logger,
        hint: ConflictHint,
        previous_log_entry_index: Option<Index>,
    ) -> Index {
        if let Some(conflict_term) = hint.conflict_term {
            match self.write_ahead_log.last_index_of_term(conflict_term) {
                Ok(Some(last_index_of_term)) => return last_index_of_term.plus(1),
                Ok(None) => { /* We have nothing from that term. Skip all of it. */ }
                Err(e) => slog::warn!(logger, "Failed to scan log for term {:?}: {:?}", conflict_term, e),
            }
        }

        hint.conflict_index
            .or(previous_log_entry_index)
            .unwrap_or_else(Index::start_index)
    }

    fn try_advance_commit_index(&mut self) {
        let peers_matched = match self.election_state.leader_state_mut() {
            Some(leader_state) => leader_state.peers_matched(),
            None => return,
        };

        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        // See also:
        // > Figure 8: A time sequence showing why a leader cannot determine
        // > commitment using log entries from older terms.
        let tentative_new_commit_index =
            match get_cluster_commit_index(self.write_ahead_log.latest_index(), peers_matched) {
                Some(index) => index,
                None => return,
            };

        match self
            .write_ahead_log
            .ratchet_fwd_commit_index_if_valid(tentative_new_commit_index, self.local_state.current_term())
        {
            Ok(true) => {
                slog::info!(self.logger, "Commit index advanced to {:?}", tentative_new_commit_index);
                self.write_ahead_log.apply_all_committed_entries();
            }
            Ok(false) => {}
            Err(ioe) => slog::warn!(
                self.logger,
                "IO failure while confirming new commit index {:?}: {:?}",
                tentative_new_commit_index,
                ioe
            ),
        }
    }

    pub(crate) fn handle_leader_timer(&mut self, tick: LeaderTimerTick) {
        let current_term = self.local_state.current_term();
        if current_term != tick.term {
            slog::debug!(
                self.logger,
                "Received leader heartbeat for outdated term {:?}, current term: {:?}",
                tick.term,
                current_term
            );
            return;
        }

        self.replicate_to_peer_and_log(&tick.peer_id, current_term);
    }

    fn replicate_to_peer_and_log(&mut self, peer_id: &ReplicaId, current_term: Term) {
        match self.replicate_to_peer(peer_id, current_term) {
            Ok(_) => {}
            Err(ReplicateToPeerError::NoLongerLeader) => {
                slog::info!(self.logger, "Wanted to replicate to {:?} but no longer leader.", peer_id)
            }
            Err(ReplicateToPeerError::PeerConcurrencyThrottle) => {
                slog::debug!(self.logger, "Request to peer {:?} already in flight", peer_id)
            }
            Err(ReplicateToPeerError::DiskRead(index, ioe)) => {
                slog::error!(self.logger, "Failed to read log entry at index {:?}: {:?}", index, ioe);
            }
            Err(ReplicateToPeerError::UnexpectedMissingLogEntry(index)) => {
                slog::error!(
                    self.logger,
                    "LeaderStateTracker is tracking index {:?}, but entry is missing from log.",
                    index
                );
            }
            Err(ReplicateToPeerError::LeaderStateMissingPeer {
                leader_state_tracker_peers,
            }) => {
                slog::error!(
                    self.logger,
                    "Peer {:?} is missing in LeaderStateTracker. LeaderStateTracker peers: [{:?}]",
                    peer_id,
                    leader_state_tracker_peers,
                )
            }
        }
    }

    fn replicate_to_peer(&mut self, peer_id: &ReplicaId, current_term: Term) -> Result<(), ReplicateToPeerError> {
        let leader_state = self
            .election_state
            .leader_state_mut()
            .ok_or(ReplicateToPeerError::NoLongerLeader)?;
        let peer_state = match leader_state.peer_state_mut(peer_id) {
            Some(peer_state) => peer_state,
            None => {
                return Err(ReplicateToPeerError::LeaderStateMissingPeer {
                    leader_state_tracker_peers: leader_state.peer_ids(),
                })
            }
        };

        let (request, descriptor) = new_append_entries_request(
            current_term,
            self.my_replica_id.clone(),
            peer_id.clone(),
            peer_state,
            &self.write_ahead_log,
            self.max_entries_per_append,
        )?;

        let logger = self
            .logger
            .new(slog::o!("Peer" => format!("{:?}", peer_id), "SeqNo" => descriptor.seq_no));
        tokio::task::spawn(peer_rpc::call_append_entries(
            logger,
            self.transport.clone(),
            request,
            descriptor,
            self.append_entries_timeout,
            self.actor_client.clone(),
        ));

        peer_state.reset_heartbeat_timer();

        Ok(())
    }

    pub(crate) fn handle_follower_timeout(&mut self, tick: FollowerTimeoutTick) {
        let current_term = self.local_state.current_term();
        if tick.term != current_term || self.election_state.is_leader() {
            slog::debug!(
                self.logger,
                "Ignoring stale election timeout for term {:?}. Election state: {:?}",
                tick.term,
                self.election_state
            );
            return;
        }

        // Write-ahead log style: vote for self and persist before asking anyone else.
        let new_term = self.local_state.increment_term_and_vote_for_self();
        if let Err(e) = self.persist() {
            slog::error!(self.logger, "Failed to persist candidacy for term {:?}: {:?}", new_term, e);
            // Sit this term out. The new election timer will try again.
            self.election_state.transition_to_follower(new_term, None);
            return;
        }

        let num_votes = self.election_state.transition_to_candidate_and_vote_for_self(new_term);
        slog::info!(
            self.logger,
            "Timed out waiting for leader. Election state: {:?}",
            self.election_state,
        );

        if num_votes >= self.cluster_tracker.quorum_size() {
            self.become_leader(new_term);
            return;
        }

        let request = RequestVoteInput {
            candidate_term: new_term,
            candidate_id: self.my_replica_id.clone(),
            candidate_last_log_entry: self.write_ahead_log.latest_entry(),
        };
        for peer_id in self.cluster_tracker.iter_peer_ids() {
            tokio::task::spawn(peer_rpc::call_request_vote(
                self.logger.new(slog::o!("Peer" => format!("{:?}", peer_id))),
                self.transport.clone(),
                peer_id.clone(),
                request.clone(),
                self.request_vote_timeout,
                self.actor_client.clone(),
            ));
        }
    }
}

/// Highest index stored on a majority of the cluster, counting the leader's own log. The leader
/// doesn't track itself in `peers_matched`, so its latest index is passed separately.
fn get_cluster_commit_index(leader_latest_index: Option<Index>, peers_matched: Vec<Option<Index>>) -> Option<Index> {
    let mut matched = peers_matched;
    matched.push(leader_latest_index);
    matched.sort();

    // At least `quorum` members hold everything up to the value at this position.
    let quorum = (matched.len() / 2) + 1;
    matched[matched.len() - quorum]
}

enum ReplicateToPeerError {
    NoLongerLeader,
    PeerConcurrencyThrottle,
    DiskRead(Index, io::Error),
    UnexpectedMissingLogEntry(Index),
    LeaderStateMissingPeer {
        leader_state_tracker_peers: HashSet<ReplicaId>,
    },
}

fn new_append_entries_request<L>(
    current_term: Term,
    my_id: ReplicaId,
    peer_id: ReplicaId,
    peer_state: &mut PeerState,
    write_ahead_log: &WriteAheadLog<L>,
    max_entries_per_append: usize,
) -> Result<(AppendEntriesInput, AppendEntriesReplyFromPeerDescriptor), ReplicateToPeerError>
where
    L: Log<WriteAheadLogEntry>,
{
    // Simplicity vs throughput tradeoff. We're just going to allow 1 outstanding request per
    // peer; no pipelining. Entries are still batched, so a lagging peer catches up quickly.
    if peer_state.has_outstanding_request() {
        return Err(ReplicateToPeerError::PeerConcurrencyThrottle);
    }

    let (next_index, opt_previous_index) = peer_state.next_and_previous_log_index();
    let leader_previous_log_entry = match opt_previous_index {
        None => None,
        Some(previous_index) => match write_ahead_log.read(previous_index) {
            Ok(Some(entry)) => Some((entry.term, previous_index)),
            Ok(None) => return Err(ReplicateToPeerError::UnexpectedMissingLogEntry(previous_index)),
            Err(e) => return Err(ReplicateToPeerError::DiskRead(previous_index, e)),
        },
    };

    let new_entries = write_ahead_log
        .read_range(next_index, max_entries_per_append)
        .map_err(|e| ReplicateToPeerError::DiskRead(next_index, e))?;

    // Only take a seq-no once the request is certain to go out.
    let seq_no = peer_state.next_seq_no();

    let descriptor = AppendEntriesReplyFromPeerDescriptor {
        peer_id,
        term: current_term,
        seq_no,
        previous_log_entry_index: opt_previous_index,
        num_log_entries: new_entries.len(),
    };

    let request = AppendEntriesInput {
        leader_term: current_term,
        leader_id: my_id,
        leader_previous_log_entry,
        leader_commit_index: write_ahead_log.commit_index(),
        new_entries,
    };

    Ok((request, descriptor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorClient, Event};
    use crate::api::MemoryPersister;
    use crate::commitlog::InMemoryLog;
    use crate::replica::replica_api::RequestVoteReply;
    use crate::replica::{create_replica, CommitStream, ElectionStateSnapshot};
    use crate::transport::TransportError;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    type TestReplica = Replica<InMemoryLog<WriteAheadLogEntry>>;

    struct UnreachableTransport;

    #[async_trait::async_trait]
    impl RaftTransport for UnreachableTransport {
        async fn request_vote(
            &self,
            peer_id: &ReplicaId,
            _request: RequestVoteInput,
        ) -> Result<RequestVoteReply, TransportError> {
            Err(TransportError::Unreachable(peer_id.clone()))
        }

        async fn append_entries(
            &self,
            peer_id: &ReplicaId,
            _request: AppendEntriesInput,
        ) -> Result<AppendEntriesReply, TransportError> {
            Err(TransportError::Unreachable(peer_id.clone()))
        }
    }

    /// Saves into `inner` unless `saves_fail` is set.
    struct FlakyPersister {
        inner: MemoryPersister,
        saves_fail: Arc<AtomicBool>,
    }

    impl Persister for FlakyPersister {
        fn save(&self, state: Bytes) -> Result<(), io::Error> {
            if self.saves_fail.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.inner.save(state)
        }

        fn load(&self) -> Result<Option<Bytes>, io::Error> {
            self.inner.load()
        }
    }

    struct Harness {
        replica: TestReplica,
        commit_stream: CommitStream,
        persister: MemoryPersister,
        saves_fail: Arc<AtomicBool>,
        // Holds the actor alive. Events are never processed.
        _client: ActorClient,
        _rx: mpsc::Receiver<Event>,
    }

    fn config() -> ReplicaConfig {
        // Long enough that no timer fires during a test.
        ReplicaConfig {
            leader_heartbeat_duration: Duration::from_secs(30),
            follower_min_timeout: Duration::from_secs(60),
            follower_max_timeout: Duration::from_secs(120),
            append_entries_timeout: Duration::from_secs(1),
            request_vote_timeout: Duration::from_secs(1),
            max_entries_per_append: 2,
        }
    }

    fn id(value: &str) -> ReplicaId {
        ReplicaId::new(value)
    }

    fn entry(term: u64, data: &'static str) -> WriteAheadLogEntry {
        WriteAheadLogEntry {
            term: Term::new(term),
            data: Bytes::from_static(data.as_bytes()),
        }
    }

    fn harness(members: &[&str], persisted: PersistentState) -> Harness {
        let persister = MemoryPersister::new();
        persister.save(persisted.encode()).unwrap();

        let cluster_tracker =
            ClusterTracker::create_valid_cluster(id(members[0]), members.iter().map(|m| id(m)).collect()).unwrap();
        let (client, rx) = ActorClient::new(1000);
        let saves_fail = Arc::new(AtomicBool::new(false));

        let (replica, commit_stream, _listener) = create_replica(
            slog::Logger::root(slog::Discard, slog::o!()),
            cluster_tracker,
            Box::new(FlakyPersister {
                inner: persister.clone(),
                saves_fail: saves_fail.clone(),
            }),
            Arc::new(UnreachableTransport),
            client.weak(),
            &config(),
            None,
        )
        .unwrap();

        Harness {
            replica,
            commit_stream,
            persister,
            saves_fail,
            _client: client,
            _rx: rx,
        }
    }

    fn persisted(term: u64, voted_for: Option<&str>, entry_terms: &[u64]) -> PersistentState {
        PersistentState {
            current_term: Term::new(term),
            voted_for: voted_for.map(id),
            entries: entry_terms.iter().map(|t| entry(*t, "x")).collect(),
        }
    }

    fn saved_state(persister: &MemoryPersister) -> PersistentState {
        PersistentState::decode(persister.load().unwrap()).unwrap()
    }

    fn vote_request(term: u64, candidate: &str, last_entry: Option<(u64, u64)>) -> RequestVoteInput {
        RequestVoteInput {
            candidate_term: Term::new(term),
            candidate_id: id(candidate),
            candidate_last_log_entry: last_entry.map(|(t, i)| (Term::new(t), Index::new(i))),
        }
    }

    fn append_request(
        term: u64,
        previous: Option<(u64, u64)>,
        commit: u64,
        entries: Vec<WriteAheadLogEntry>,
    ) -> AppendEntriesInput {
        AppendEntriesInput {
            leader_term: Term::new(term),
            leader_id: id("b"),
            leader_previous_log_entry: previous.map(|(t, i)| (Term::new(t), Index::new(i))),
            leader_commit_index: Index::from_u64_or_none(commit),
            new_entries: entries,
        }
    }

    fn log_terms(replica: &TestReplica) -> Vec<u64> {
        replica
            .write_ahead_log
            .all_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.term.as_u64())
            .collect()
    }

    #[tokio::test]
    async fn vote_is_granted_once_per_term_and_persisted() {
        let mut h = harness(&["a", "b", "c"], persisted(1, None, &[1]));

        let granted = h.replica.server_handle_request_vote(vote_request(2, "b", Some((1, 1)))).unwrap();
        assert_eq!(
            granted,
            RequestVoteOutput {
                term: Term::new(2),
                vote_granted: true
            }
        );
        let saved = saved_state(&h.persister);
        assert_eq!(saved.current_term, Term::new(2));
        assert_eq!(saved.voted_for, Some(id("b")));

        // Same candidate retrying gets the same answer, a different one doesn't.
        assert!(h.replica.server_handle_request_vote(vote_request(2, "b", Some((1, 1)))).unwrap().vote_granted);
        assert!(!h.replica.server_handle_request_vote(vote_request(2, "c", Some((1, 5)))).unwrap().vote_granted);

        // Stale candidate learns our term.
        let stale = h.replica.server_handle_request_vote(vote_request(1, "c", Some((1, 5)))).unwrap();
        assert_eq!(
            stale,
            RequestVoteOutput {
                term: Term::new(2),
                vote_granted: false
            }
        );

        assert!(matches!(
            h.replica.server_handle_request_vote(vote_request(3, "z", None)),
            Err(RequestVoteError::CandidateNotInCluster)
        ));
    }

    #[tokio::test]
    async fn vote_refused_to_candidate_with_older_log_but_term_adopted() {
        let mut h = harness(&["a", "b", "c"], persisted(2, None, &[1, 2]));

        // Higher last term wins, otherwise longer log wins.
        for last_entry in vec![None, Some((1, 9)), Some((2, 1))] {
            let reply = h.replica.server_handle_request_vote(vote_request(5, "b", last_entry)).unwrap();
            assert!(!reply.vote_granted, "{:?}", last_entry);
        }
        assert_eq!(h.replica.local_state.current_term(), Term::new(5));
        assert_eq!(saved_state(&h.persister).current_term, Term::new(5));
        assert_eq!(saved_state(&h.persister).voted_for, None);

        assert!(h.replica.server_handle_request_vote(vote_request(5, "b", Some((2, 2)))).unwrap().vote_granted);
        assert!(h.replica.server_handle_request_vote(vote_request(6, "c", Some((3, 1)))).unwrap().vote_granted);
    }

    #[tokio::test]
    async fn restored_vote_is_honored_until_next_term() {
        let mut h = harness(&["a", "b", "c"], persisted(4, Some("b"), &[1, 4]));

        assert_eq!(h.replica.local_state.current_term(), Term::new(4));
        assert!(!h.replica.server_handle_request_vote(vote_request(4, "c", Some((4, 2)))).unwrap().vote_granted);
        assert!(h.replica.server_handle_request_vote(vote_request(4, "b", Some((4, 2)))).unwrap().vote_granted);
        assert!(h.replica.server_handle_request_vote(vote_request(5, "c", Some((4, 2)))).unwrap().vote_granted);
        assert_eq!(saved_state(&h.persister).voted_for, Some(id("c")));
    }

    #[tokio::test]
    async fn follower_truncates_divergent_suffix_and_applies_in_order() {
        // Follower has uncommitted entries from a deposed term 2 leader.
        let mut h = harness(&["a", "b", "c"], persisted(2, None, &[1, 1, 2, 2]));

        let result = h.replica.server_handle_append_entries(append_request(
            3,
            Some((1, 2)),
            3,
            vec![entry(3, "new")],
        ));
        assert!(result.is_ok());

        assert_eq!(log_terms(&h.replica), vec![1, 1, 3]);
        assert_eq!(h.replica.write_ahead_log.commit_index(), Some(Index::new(3)));
        let saved = saved_state(&h.persister);
        assert_eq!(saved.current_term, Term::new(3));
        assert_eq!(saved.entries.len(), 3);
        assert_eq!(
            h.replica.election_state.current_status().state,
            ElectionStateSnapshot::Follower(id("b"))
        );

        let mut applied = Vec::new();
        for _ in 0..3 {
            let committed = h.commit_stream.recv().await.unwrap();
            applied.push((committed.index.as_u64(), committed.term.as_u64(), committed.data));
        }
        assert_eq!(
            applied,
            vec![
                (1, 1, Bytes::from_static(b"x")),
                (2, 1, Bytes::from_static(b"x")),
                (3, 3, Bytes::from_static(b"new")),
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_append_is_idempotent() {
        let mut h = harness(&["a", "b", "c"], persisted(1, None, &[]));

        let request = || append_request(1, None, 0, vec![entry(1, "one"), entry(1, "two")]);
        h.replica.server_handle_append_entries(request()).unwrap();
        h.replica.server_handle_append_entries(request()).unwrap();
        // An older, shorter request must not cut the log.
        h.replica
            .server_handle_append_entries(append_request(1, None, 0, vec![entry(1, "one")]))
            .unwrap();

        assert_eq!(log_terms(&h.replica), vec![1, 1]);
    }

    #[tokio::test]
    async fn consistency_check_failures_carry_conflict_hints() {
        let mut h = harness(&["a", "b", "c"], persisted(2, None, &[1, 1, 2, 2]));

        let too_short = h.replica.server_handle_append_entries(append_request(3, Some((3, 9)), 0, vec![]));
        match too_short {
            Err(AppendEntriesError::ServerMissingPreviousLogEntry(hint)) => assert_eq!(
                hint,
                ConflictHint {
                    conflict_term: None,
                    conflict_index: Some(Index::new(5)),
                }
            ),
            other => panic!("Unexpected result {:?}", other),
        }

        let wrong_term = h.replica.server_handle_append_entries(append_request(3, Some((3, 4)), 0, vec![]));
        match wrong_term {
            Err(AppendEntriesError::ServerMissingPreviousLogEntry(hint)) => assert_eq!(
                hint,
                ConflictHint {
                    conflict_term: Some(Term::new(2)),
                    conflict_index: Some(Index::new(3)),
                }
            ),
            other => panic!("Unexpected result {:?}", other),
        }

        // The term was still adopted and persisted, and the log left alone.
        assert_eq!(saved_state(&h.persister).current_term, Term::new(3));
        assert_eq!(log_terms(&h.replica), vec![1, 1, 2, 2]);
    }

    #[tokio::test]
    async fn stale_leader_is_told_current_term() {
        let mut h = harness(&["a", "b", "c"], persisted(4, None, &[]));

        match h.replica.server_handle_append_entries(append_request(3, None, 0, vec![])) {
            Err(AppendEntriesError::ClientTermOutOfDate(info)) => assert_eq!(info.current_term, Term::new(4)),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn single_member_cluster_elects_itself_and_commits_immediately() {
        let mut h = harness(&["a"], persisted(0, None, &[]));

        match h.replica.handle_enqueue_for_replication(EnqueueForReplicationInput {
            data: Bytes::from_static(b"early"),
        }) {
            Err(EnqueueForReplicationError::NotLeader(None)) => {}
            other => panic!("Unexpected result {:?}", other),
        }

        h.replica.handle_follower_timeout(FollowerTimeoutTick { term: Term::new(0) });
        assert!(h.replica.election_state.is_leader());
        assert_eq!(saved_state(&h.persister).voted_for, Some(id("a")));

        let output = h
            .replica
            .handle_enqueue_for_replication(EnqueueForReplicationInput {
                data: Bytes::from_static(b"cmd"),
            })
            .unwrap();
        assert_eq!(output.enqueued_term, Term::new(1));
        assert_eq!(output.enqueued_index, Index::new(1));

        let committed = h.commit_stream.recv().await.unwrap();
        assert_eq!(committed.index, Index::new(1));
        assert_eq!(committed.data, Bytes::from_static(b"cmd"));
    }

    #[tokio::test]
    async fn stale_election_timeout_is_ignored() {
        let mut h = harness(&["a", "b", "c"], persisted(3, None, &[]));

        h.replica.handle_follower_timeout(FollowerTimeoutTick { term: Term::new(2) });

        assert_eq!(h.replica.local_state.current_term(), Term::new(3));
        assert!(h.replica.election_state.is_follower());
    }

    /// Makes "a" leader of term 3 with the given log.
    fn leader_harness(entry_terms: &[u64]) -> Harness {
        let mut h = harness(&["a", "b", "c"], persisted(2, None, entry_terms));
        h.replica.handle_follower_timeout(FollowerTimeoutTick { term: Term::new(2) });
        h.replica.handle_request_vote_reply_from_peer(RequestVoteReplyFromPeer {
            peer_id: id("b"),
            term: Term::new(3),
            result: Ok(RequestVoteReply {
                term: Term::new(3),
                vote_granted: true,
            }),
        });
        assert!(h.replica.election_state.is_leader());
        h
    }

    fn peer_next_index(replica: &mut TestReplica, peer: &str) -> Index {
        replica
            .election_state
            .leader_state_mut()
            .unwrap()
            .peer_state_mut(&id(peer))
            .unwrap()
            .next_and_previous_log_index()
            .0
    }

    #[tokio::test]
    async fn leader_backs_off_using_conflict_hint() {
        let mut h = leader_harness(&[1, 1, 2, 2, 2]);
        assert_eq!(peer_next_index(&mut h.replica, "c"), Index::new(6));

        h.replica.handle_leader_timer(LeaderTimerTick {
            peer_id: id("c"),
            term: Term::new(3),
        });
        h.replica.handle_append_entries_reply_from_peer(AppendEntriesReplyFromPeer {
            descriptor: AppendEntriesReplyFromPeerDescriptor {
                peer_id: id("c"),
                term: Term::new(3),
                seq_no: 1,
                previous_log_entry_index: Some(Index::new(5)),
                num_log_entries: 0,
            },
            // Peer's entry at 5 is from term 1, a term we stopped at index 2.
            result: Ok(AppendEntriesReply::MissingPreviousLogEntry(ConflictHint {
                conflict_term: Some(Term::new(1)),
                conflict_index: Some(Index::new(1)),
            })),
        });

        assert_eq!(peer_next_index(&mut h.replica, "c"), Index::new(3));
    }

    #[tokio::test]
    async fn leader_steps_down_on_higher_term_reply() {
        let mut h = leader_harness(&[]);

        h.replica.handle_append_entries_reply_from_peer(AppendEntriesReplyFromPeer {
            descriptor: AppendEntriesReplyFromPeerDescriptor {
                peer_id: id("c"),
                term: Term::new(3),
                seq_no: 1,
                previous_log_entry_index: None,
                num_log_entries: 0,
            },
            result: Ok(AppendEntriesReply::StaleTerm {
                current_term: Term::new(7),
            }),
        });

        assert!(h.replica.election_state.is_follower());
        assert_eq!(saved_state(&h.persister).current_term, Term::new(7));
    }

    #[tokio::test]
    async fn leader_commits_current_term_entry_on_majority() {
        let mut h = leader_harness(&[1]);
        h.replica
            .handle_enqueue_for_replication(EnqueueForReplicationInput {
                data: Bytes::from_static(b"cmd"),
            })
            .unwrap();
        // The eager replication round took seq-no 1 for both peers.
        h.replica.handle_append_entries_reply_from_peer(AppendEntriesReplyFromPeer {
            descriptor: AppendEntriesReplyFromPeerDescriptor {
                peer_id: id("b"),
                term: Term::new(3),
                seq_no: 1,
                previous_log_entry_index: Some(Index::new(1)),
                num_log_entries: 1,
            },
            result: Ok(AppendEntriesReply::Success),
        });

        assert_eq!(h.replica.write_ahead_log.commit_index(), Some(Index::new(2)));
        assert_eq!(h.commit_stream.recv().await.unwrap().index, Index::new(1));
        assert_eq!(h.commit_stream.recv().await.unwrap().index, Index::new(2));
    }

    #[tokio::test]
    async fn failed_save_takes_back_started_entry() {
        let mut h = leader_harness(&[1]);
        h.saves_fail.store(true, Ordering::SeqCst);

        match h.replica.handle_enqueue_for_replication(EnqueueForReplicationInput {
            data: Bytes::from_static(b"cmd"),
        }) {
            Err(EnqueueForReplicationError::LocalIoError(_)) => {}
            other => panic!("Unexpected result {:?}", other),
        }

        assert_eq!(log_terms(&h.replica), vec![1]);
        assert_eq!(saved_state(&h.persister).entries.len(), 1);

        h.saves_fail.store(false, Ordering::SeqCst);
        let output = h
            .replica
            .handle_enqueue_for_replication(EnqueueForReplicationInput {
                data: Bytes::from_static(b"cmd"),
            })
            .unwrap();
        assert_eq!(output.enqueued_index, Index::new(2));
        assert_eq!(saved_state(&h.persister).entries.len(), 2);
    }

    #[tokio::test]
    async fn vote_is_not_granted_until_saved() {
        let mut h = harness(&["a", "b", "c"], persisted(1, None, &[1]));
        h.saves_fail.store(true, Ordering::SeqCst);

        match h.replica.server_handle_request_vote(vote_request(2, "b", Some((1, 1)))) {
            Err(RequestVoteError::ServerIoError(_)) => {}
            other => panic!("Unexpected result {:?}", other),
        }
        assert_eq!(saved_state(&h.persister).current_term, Term::new(1));
        assert_eq!(saved_state(&h.persister).voted_for, None);

        // The candidate's retry finds the vote in memory and must save it before granting.
        h.saves_fail.store(false, Ordering::SeqCst);
        let granted = h.replica.server_handle_request_vote(vote_request(2, "b", Some((1, 1)))).unwrap();
        assert!(granted.vote_granted);
        let saved = saved_state(&h.persister);
        assert_eq!(saved.current_term, Term::new(2));
        assert_eq!(saved.voted_for, Some(id("b")));
    }

    #[tokio::test]
    async fn retried_append_is_not_acked_until_saved() {
        let mut h = harness(&["a", "b", "c"], persisted(0, None, &[]));
        let request = || append_request(1, None, 1, vec![entry(1, "one")]);

        h.saves_fail.store(true, Ordering::SeqCst);
        for _ in 0..2 {
            match h.replica.server_handle_append_entries(request()) {
                Err(AppendEntriesError::ServerIoError(_)) => {}
                other => panic!("Unexpected result {:?}", other),
            }
        }
        assert_eq!(h.replica.write_ahead_log.commit_index(), None);
        assert_eq!(saved_state(&h.persister).entries.len(), 0);

        h.saves_fail.store(false, Ordering::SeqCst);
        h.replica.server_handle_append_entries(request()).unwrap();

        let saved = saved_state(&h.persister);
        assert_eq!(saved.current_term, Term::new(1));
        assert_eq!(saved.entries.len(), 1);
        assert_eq!(h.replica.write_ahead_log.commit_index(), Some(Index::new(1)));
        assert_eq!(h.commit_stream.recv().await.unwrap().index, Index::new(1));
    }

    #[tokio::test]
    async fn stale_term_reply_saves_term_adopted_during_failed_save() {
        let mut h = harness(&["a", "b", "c"], persisted(1, None, &[]));

        h.saves_fail.store(true, Ordering::SeqCst);
        assert!(h
            .replica
            .server_handle_append_entries(append_request(3, None, 0, vec![]))
            .is_err());
        assert_eq!(saved_state(&h.persister).current_term, Term::new(1));

        h.saves_fail.store(false, Ordering::SeqCst);
        match h.replica.server_handle_append_entries(append_request(2, None, 0, vec![])) {
            Err(AppendEntriesError::ClientTermOutOfDate(info)) => assert_eq!(info.current_term, Term::new(3)),
            other => panic!("Unexpected result {:?}", other),
        }
        assert_eq!(saved_state(&h.persister).current_term, Term::new(3));
    }

    #[test]
    fn test_commit_checker_logic() {
        fn opt_index(v: u64) -> Option<Index> {
            Index::from_u64_or_none(v)
        }

        // Leader is always at 9.
        fn run(expected: u64, matches: Vec<u64>) {
            let matches = matches.into_iter().map(opt_index).collect();
            assert_eq!(opt_index(expected), get_cluster_commit_index(opt_index(9), matches));
        }

        // 1-cluster
        run(9, vec![]);

        // 3-cluster
        run(0, vec![0, 0]);
        run(9, vec![0, 9]);
        run(9, vec![8, 9]);

        // 4-cluster
        run(0, vec![0, 0, 0]);
        run(0, vec![0, 0, 9]);
        run(8, vec![0, 8, 9]);
        run(8, vec![7, 8, 9]);

        // 5-cluster
        run(0, vec![0, 0, 0, 0]);
        run(0, vec![0, 0, 0, 9]);
        run(8, vec![0, 0, 8, 9]);
        run(8, vec![0, 7, 8, 9]);
        run(8, vec![6, 7, 8, 9]);

        // 6-cluster
        run(0, vec![0, 0, 0, 0, 0]);
        run(0, vec![0, 0, 0, 0, 9]);
        run(0, vec![0, 0, 0, 8, 9]);
        run(7, vec![0, 0, 7, 8, 9]);
        run(7, vec![0, 6, 7, 8, 9]);
        run(7, vec![5, 6, 7, 8, 9]);

        // 7-cluster
        run(0, vec![0, 0, 0, 0, 0, 0]);
        run(0, vec![0, 0, 0, 0, 0, 9]);
        run(0, vec![0, 0, 0, 0, 8, 9]);
        run(7, vec![0, 0, 0, 7, 8, 9]);
        run(7, vec![0, 0, 6, 7, 8, 9]);
        run(7, vec![0, 5, 6, 7, 8, 9]);
        run(7, vec![4, 5, 6, 7, 8, 9]);

        // Ordering doesn't matter
        run(9, vec![9, 8]);
        run(8, vec![7, 9, 8]);
        run(8, vec![6, 0, 8, 9]);
        run(7, vec![9, 8, 0, 0, 7]);
    }
}
