use crate::replica::{ReplicaId, Term};
use tokio::sync::watch;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ElectionStateSnapshot {
    Leader,
    Candidate,
    Follower(ReplicaId),
    FollowerNoLeader,
}

/// ElectionStatus is what a replica publishes on every role or term change.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ElectionStatus {
    pub(crate) term: Term,
    pub(crate) state: ElectionStateSnapshot,
}

pub(super) fn new(initial_status: ElectionStatus) -> (ElectionStateChangeNotifier, ElectionStateChangeListener) {
    let (snd, rcv) = watch::channel(initial_status);

    (ElectionStateChangeNotifier { snd }, ElectionStateChangeListener { rcv })
}

pub(super) struct ElectionStateChangeNotifier {
    snd: watch::Sender<ElectionStatus>,
}

impl ElectionStateChangeNotifier {
    pub(super) fn notify_new_status(&self, new_status: ElectionStatus) {
        let _ = self.snd.send(new_status);
    }
}

#[derive(Clone)]
pub(crate) struct ElectionStateChangeListener {
    rcv: watch::Receiver<ElectionStatus>,
}

impl ElectionStateChangeListener {
    /// Waits for the next change. Intermediate changes are coalesced. Returns `None` once the
    /// replica is gone.
    pub(crate) async fn next(&mut self) -> Option<ElectionStatus> {
        match self.rcv.changed().await {
            Ok(_) => Some(self.rcv.borrow().clone()),
            Err(_) => None,
        }
    }

    /// Latest published status, without waiting. After the replica is gone this is the last
    /// status it published.
    pub(crate) fn current(&self) -> ElectionStatus {
        self.rcv.borrow().clone()
    }
}
