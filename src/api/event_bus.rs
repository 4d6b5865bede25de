use crate::replica::{ElectionStateChangeListener, ElectionStateSnapshot, ElectionStatus};

/// An event that happened, as observed by the local raft replica.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RaftEvent {
    /// A role or term change. Intermediate changes between two calls to `next_event()` are
    /// coalesced into the most recent one.
    Election { term: u64, state: RaftElectionState },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RaftElectionState {
    Leader,
    Candidate,
    Follower(String),
    FollowerNoLeader,
}

pub struct RaftEventListener {
    election_state_change_listener: ElectionStateChangeListener,
}

impl RaftEventListener {
    pub(crate) fn new(election_state_change_listener: ElectionStateChangeListener) -> Self {
        RaftEventListener {
            election_state_change_listener,
        }
    }

    /// Waits for the next event. Returns `None` once the replica is gone.
    pub async fn next_event(&mut self) -> Option<RaftEvent> {
        self.election_state_change_listener.next().await.map(RaftEvent::from)
    }
}

// ------- Conversions --------

impl From<ElectionStatus> for RaftEvent {
    fn from(status: ElectionStatus) -> Self {
        RaftEvent::Election {
            term: status.term.as_u64(),
            state: RaftElectionState::from(status.state),
        }
    }
}

impl From<ElectionStateSnapshot> for RaftElectionState {
    fn from(snapshot: ElectionStateSnapshot) -> Self {
        match snapshot {
            ElectionStateSnapshot::Leader => RaftElectionState::Leader,
            ElectionStateSnapshot::Candidate => RaftElectionState::Candidate,
            ElectionStateSnapshot::Follower(leader_id) => RaftElectionState::Follower(leader_id.into_inner()),
            ElectionStateSnapshot::FollowerNoLeader => RaftElectionState::FollowerNoLeader,
        }
    }
}
