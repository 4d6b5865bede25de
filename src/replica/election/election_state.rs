use crate::actor::WeakActorClient;
use crate::commitlog::Index;
use crate::replica::election::state_change_listener::ElectionStateChangeNotifier;
use crate::replica::election::timers::{FollowerTimerHandle, HeartbeatTimerHandle};
use crate::replica::election::{state_change_listener, LeaderStateTracker, PeerState};
use crate::replica::{ElectionStateChangeListener, ElectionStateSnapshot, ElectionStatus, ReplicaId, Term};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

#[derive(Clone)]
pub(crate) struct ElectionConfig {
    pub my_replica_id: ReplicaId,
    pub leader_heartbeat_duration: Duration,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
}

/// ElectionState is responsible for holding state specific to the stage in an election. Its
/// methods are responsible for "what" to do. It is NOT responsible for validating anything
/// specific to logs, terms, peers, etc. or knowing "when" to do something.
///
/// Every transition is tagged with the term it happens in, so listeners always see a consistent
/// (term, role) pair.
pub(crate) struct ElectionState {
    state: State,
    term: Term,
    config: ElectionConfig,
    actor_client: WeakActorClient,
    state_change_notifier: ElectionStateChangeNotifier,
}

impl ElectionState {
    /// `new_follower()` creates a new ElectionState instance that starts out as a follower.
    pub(crate) fn new_follower(
        config: ElectionConfig,
        term: Term,
        actor_client: WeakActorClient,
    ) -> (Self, ElectionStateChangeListener) {
        let initial_state = State::Follower(FollowerState::new(None, &config, actor_client.clone(), term));
        let (notifier, listener) = state_change_listener::new(Self::status_impl(term, &initial_state));

        let election_state = Self {
            state: initial_state,
            term,
            config,
            actor_client,
            state_change_notifier: notifier,
        };

        (election_state, listener)
    }

    pub(crate) fn transition_to_follower(&mut self, term: Term, new_leader: Option<ReplicaId>) {
        self.state = State::Follower(FollowerState::new(
            new_leader,
            &self.config,
            self.actor_client.clone(),
            term,
        ));
        self.term = term;
        self.notify_new_status();
    }

    /// Returns the number of votes we have, which is just our own.
    pub(crate) fn transition_to_candidate_and_vote_for_self(&mut self, term: Term) -> usize {
        let mut cs = CandidateState::new(&self.config, self.actor_client.clone(), term);

        let num_votes = cs.add_received_vote(self.config.my_replica_id.clone());

        self.state = State::Candidate(cs);
        self.term = term;
        self.notify_new_status();

        num_votes
    }

    pub(crate) fn transition_to_leader(
        &mut self,
        term: Term,
        peer_ids: HashSet<ReplicaId>,
        leader_latest_index: Option<Index>,
    ) {
        self.state = State::Leader(LeaderState::new(
            peer_ids,
            leader_latest_index,
            self.config.leader_heartbeat_duration,
            self.actor_client.clone(),
            term,
        ));
        self.term = term;
        self.notify_new_status();
    }

    pub(crate) fn current_status(&self) -> ElectionStatus {
        Self::status_impl(self.term, &self.state)
    }

    fn status_impl(term: Term, state: &State) -> ElectionStatus {
        let state = match state {
            State::Leader(_) => ElectionStateSnapshot::Leader,
            State::Candidate(_) => ElectionStateSnapshot::Candidate,
            State::Follower(FollowerState { leader: None, .. }) => ElectionStateSnapshot::FollowerNoLeader,
            State::Follower(FollowerState {
                leader: Some(leader_id),
                ..
            }) => ElectionStateSnapshot::Follower(leader_id.clone()),
        };

        ElectionStatus { term, state }
    }

    fn notify_new_status(&self) {
        self.state_change_notifier.notify_new_status(self.current_status());
    }

    pub(crate) fn is_leader(&self) -> bool {
        matches!(self.state, State::Leader(_))
    }

    pub(crate) fn is_follower(&self) -> bool {
        matches!(self.state, State::Follower(_))
    }

    /// The leader of the current term, as far as we know.
    pub(crate) fn known_leader(&self) -> Option<&ReplicaId> {
        match &self.state {
            State::Leader(_) => Some(&self.config.my_replica_id),
            State::Candidate(_) => None,
            State::Follower(fs) => fs.leader.as_ref(),
        }
    }

    pub(crate) fn reset_timeout_if_follower(&self) {
        if let State::Follower(fs) = &self.state {
            fs.reset_timeout();
        }
    }

    pub(crate) fn set_leader_if_unknown(&mut self, leader: &ReplicaId) {
        if let State::Follower(fs) = &mut self.state {
            if fs.leader.is_none() {
                fs.leader.replace(leader.clone());
                self.notify_new_status();
            }
        }
    }

    /// Return number of votes received if candidate, or None if no longer Candidate.
    pub(crate) fn add_vote_if_candidate(&mut self, vote_from: ReplicaId) -> Option<usize> {
        if let State::Candidate(cs) = &mut self.state {
            Some(cs.add_received_vote(vote_from))
        } else {
            None
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderStateTracker> {
        if let State::Leader(ls) = &mut self.state {
            Some(&mut ls.tracker)
        } else {
            None
        }
    }
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Leader(_) => write!(f, "Leader(Term={:?})", self.term),
            State::Candidate(_) => write!(f, "Candidate(Term={:?})", self.term),
            State::Follower(FollowerState {
                leader: Some(leader_id),
                ..
            }) => write!(f, "Follower(Term={:?}, Leader={:?})", self.term, leader_id),
            State::Follower(FollowerState { leader: None, .. }) => {
                write!(f, "Follower(Term={:?}, Leader=None)", self.term)
            }
        }
    }
}

enum State {
    Leader(LeaderState),
    Candidate(CandidateState),
    Follower(FollowerState),
}

struct LeaderState {
    tracker: LeaderStateTracker,
}

struct CandidateState {
    received_votes_from: HashSet<ReplicaId>,
    // A candidate whose election times out starts a new one.
    _follower_timeout_tracker: FollowerTimerHandle,
}

struct FollowerState {
    leader: Option<ReplicaId>,
    follower_timeout_tracker: FollowerTimerHandle,
}

impl LeaderState {
    fn new(
        peer_ids: HashSet<ReplicaId>,
        leader_latest_index: Option<Index>,
        heartbeat_duration: Duration,
        actor_client: WeakActorClient,
        term: Term,
    ) -> Self {
        let mut peer_state = HashMap::with_capacity(peer_ids.len());
        for peer_id in peer_ids {
            let heartbeat_timer =
                HeartbeatTimerHandle::spawn_timer_task(heartbeat_duration, actor_client.clone(), peer_id.clone(), term);
            peer_state.insert(peer_id, PeerState::new(heartbeat_timer, leader_latest_index));
        }

        Self {
            tracker: LeaderStateTracker::new(peer_state),
        }
    }
}

impl CandidateState {
    fn new(config: &ElectionConfig, actor_client: WeakActorClient, term: Term) -> Self {
        Self {
            received_votes_from: HashSet::with_capacity(3),
            _follower_timeout_tracker: FollowerTimerHandle::spawn_timer_task(
                config.follower_min_timeout,
                config.follower_max_timeout,
                actor_client,
                term,
            ),
        }
    }

    /// `add_received_vote()` returns the number of unique votes we've received after adding the
    /// provided `vote_from`
    fn add_received_vote(&mut self, vote_from: ReplicaId) -> usize {
        self.received_votes_from.insert(vote_from);
        self.received_votes_from.len()
    }
}

impl FollowerState {
    fn new(leader: Option<ReplicaId>, config: &ElectionConfig, actor_client: WeakActorClient, term: Term) -> Self {
        Self {
            leader,
            follower_timeout_tracker: FollowerTimerHandle::spawn_timer_task(
                config.follower_min_timeout,
                config.follower_max_timeout,
                actor_client,
                term,
            ),
        }
    }

    fn reset_timeout(&self) {
        self.follower_timeout_tracker.reset_timeout();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;

    fn config() -> ElectionConfig {
        ElectionConfig {
            my_replica_id: ReplicaId::new("me"),
            leader_heartbeat_duration: Duration::from_secs(10),
            follower_min_timeout: Duration::from_secs(30),
            follower_max_timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn every_transition_is_published_with_its_term() {
        let (client, _rx) = ActorClient::new(10);
        let (mut election_state, mut listener) = ElectionState::new_follower(config(), Term::new(4), client.weak());

        assert_eq!(
            listener.current(),
            ElectionStatus {
                term: Term::new(4),
                state: ElectionStateSnapshot::FollowerNoLeader
            }
        );

        assert_eq!(election_state.transition_to_candidate_and_vote_for_self(Term::new(5)), 1);
        assert_eq!(
            listener.next().await,
            Some(ElectionStatus {
                term: Term::new(5),
                state: ElectionStateSnapshot::Candidate
            })
        );
        assert_eq!(election_state.known_leader(), None);

        // Duplicate votes aren't counted twice.
        assert_eq!(election_state.add_vote_if_candidate(ReplicaId::new("a")), Some(2));
        assert_eq!(election_state.add_vote_if_candidate(ReplicaId::new("a")), Some(2));

        let peers = vec![ReplicaId::new("a"), ReplicaId::new("b")].into_iter().collect();
        election_state.transition_to_leader(Term::new(5), peers, Some(Index::new(2)));
        assert!(election_state.is_leader());
        assert_eq!(election_state.known_leader(), Some(&ReplicaId::new("me")));
        assert_eq!(election_state.add_vote_if_candidate(ReplicaId::new("b")), None);
        assert_eq!(
            listener.next().await.map(|status| status.state),
            Some(ElectionStateSnapshot::Leader)
        );

        let tracker = election_state.leader_state_mut().unwrap();
        assert_eq!(tracker.peer_ids().len(), 2);
        assert_eq!(tracker.peers_matched(), vec![None, None]);

        election_state.transition_to_follower(Term::new(6), None);
        assert!(election_state.leader_state_mut().is_none());
        election_state.set_leader_if_unknown(&ReplicaId::new("b"));
        assert_eq!(
            listener.current(),
            ElectionStatus {
                term: Term::new(6),
                state: ElectionStateSnapshot::Follower(ReplicaId::new("b"))
            }
        );
    }
}
