use crate::commitlog::Index;
use crate::replica::election::timers::HeartbeatTimerHandle;
use crate::replica::ReplicaId;
use std::cmp;
use std::collections::{HashMap, HashSet};

/// LeaderStateTracker is the leader-only `nextIndex[]`/`matchIndex[]` table. It is created fresh
/// on every election win and dropped with the leadership, which also stops every peer's heartbeat
/// timer.
pub(crate) struct LeaderStateTracker {
    peer_state: HashMap<ReplicaId, PeerState>,
}

impl LeaderStateTracker {
    pub(super) fn new(peer_state: HashMap<ReplicaId, PeerState>) -> Self {
        LeaderStateTracker { peer_state }
    }

    pub(crate) fn peer_state_mut(&mut self, peer_id: &ReplicaId) -> Option<&mut PeerState> {
        self.peer_state.get_mut(peer_id)
    }

    pub(crate) fn peer_ids(&self) -> HashSet<ReplicaId> {
        self.peer_state.keys().cloned().collect()
    }

    pub(crate) fn peers_matched(&self) -> Vec<Option<Index>> {
        self.peer_state.values().map(|peer_state| peer_state.matched()).collect()
    }
}

pub(crate) struct PeerState {
    // Held to send heartbeats for this peer
    heartbeat_timer: HeartbeatTimerHandle,

    // > index of the next log entry to send to that server
    // > (initialized to leader last log index + 1)
    next: Index,
    // > index of highest log entry known to be replicated on server
    // > (initialized to 0, increases monotonically)
    matched: Option<Index>,

    // SeqNo is a logical clock over a term leader's interactions with a peer. Each request takes
    // the next SeqNo and only a reply to the latest request is accepted, so late or duplicated
    // replies can't rewind our view of the peer.
    last_sent_seq_no: u64,
    last_received_seq_no: u64,
}

impl PeerState {
    pub(super) fn new(heartbeat_timer: HeartbeatTimerHandle, leader_latest_index: Option<Index>) -> Self {
        PeerState {
            heartbeat_timer,
            next: leader_latest_index
                .map(|i| i.plus(1))
                .unwrap_or_else(Index::start_index),
            matched: None,
            last_sent_seq_no: 0,
            last_received_seq_no: 0,
        }
    }

    pub(crate) fn next_and_previous_log_index(&self) -> (Index, Option<Index>) {
        (self.next, self.next.checked_minus(1))
    }

    pub(crate) fn matched(&self) -> Option<Index> {
        self.matched
    }

    /// Returns false if the reply was stale and dropped.
    pub(crate) fn handle_append_entries_result(
        &mut self,
        logger: &slog::Logger,
        received_seq_no: u64,
        update: PeerStateUpdate,
    ) -> bool {
        if !self.ratchet_fwd_received_seq_no(received_seq_no) {
            slog::warn!(logger, "Dropping out of date seq-no({:?}): {:?}", received_seq_no, update);
            return false;
        }

        match update {
            PeerStateUpdate::OtherError => { /* No action */ }
            PeerStateUpdate::Success {
                previous_log_entry,
                num_entries_replicated,
            } => {
                self.update_log(previous_log_entry, num_entries_replicated);
            }
            PeerStateUpdate::PeerLogBehind { suggested_next } => {
                self.rewind_log(logger, suggested_next);
            }
        }

        true
    }

    fn update_log(&mut self, previous_log_entry: Option<Index>, num_entries_replicated: usize) {
        // A successful heartbeat still proves the peer's log matches ours up to previous_log_entry.
        let new_matched = match (previous_log_entry, num_entries_replicated) {
            (None, 0) => return,
            (None, n) => Index::new_usize(n),
            (Some(prev), n) => prev.plus(n as u64),
        };

        let new_matched = match self.matched {
            Some(matched) => cmp::max(matched, new_matched),
            None => new_matched,
        };
        self.matched.replace(new_matched);
        self.next = cmp::max(self.next, new_matched.plus(1));
    }

    /// Move `next` back towards `suggested_next`. It always moves back by at least one and never
    /// below what the peer is known to have matched.
    fn rewind_log(&mut self, logger: &slog::Logger, suggested_next: Index) {
        let floor = self
            .matched
            .map(|matched| matched.plus(1))
            .unwrap_or_else(Index::start_index);

        let ceiling = match self.next.checked_minus(1) {
            Some(ceiling) if ceiling >= floor => ceiling,
            // Don't panic here, because peer could return garbage data.
            _ => {
                slog::warn!(
                    logger,
                    "Can't rewind peer log below {:?}. Next={:?}, Matched={:?}",
                    floor,
                    self.next,
                    self.matched
                );
                return;
            }
        };

        self.next = cmp::max(floor, cmp::min(ceiling, suggested_next));
    }

    pub(crate) fn has_outstanding_request(&self) -> bool {
        self.last_received_seq_no < self.last_sent_seq_no
    }

    pub(crate) fn next_seq_no(&mut self) -> u64 {
        self.last_sent_seq_no += 1;
        self.last_sent_seq_no
    }

    /// returns true if the state was mutated.
    fn ratchet_fwd_received_seq_no(&mut self, received_seq_no: u64) -> bool {
        if self.last_received_seq_no < received_seq_no && received_seq_no <= self.last_sent_seq_no {
            self.last_received_seq_no = received_seq_no;
            true
        } else {
            false
        }
    }

    pub(crate) fn reset_heartbeat_timer(&self) {
        self.heartbeat_timer.reset_heartbeat_timer();
    }
}

#[derive(Debug)]
pub(crate) enum PeerStateUpdate {
    Success {
        previous_log_entry: Option<Index>,
        num_entries_replicated: usize,
    },
    PeerLogBehind {
        suggested_next: Index,
    },
    OtherError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::Term;
    use std::time::Duration;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn peer_state(client: &ActorClient, leader_latest_index: Option<Index>) -> PeerState {
        let timer = HeartbeatTimerHandle::spawn_timer_task(
            Duration::from_secs(60),
            client.weak(),
            ReplicaId::new("peer"),
            Term::new(1),
        );
        PeerState::new(timer, leader_latest_index)
    }

    fn send_and_receive(peer: &mut PeerState, update: PeerStateUpdate) -> bool {
        let seq_no = peer.next_seq_no();
        assert!(peer.has_outstanding_request());
        let accepted = peer.handle_append_entries_result(&logger(), seq_no, update);
        assert!(!peer.has_outstanding_request());
        accepted
    }

    #[tokio::test]
    async fn starts_optimistically_after_leader_log() {
        let (client, _rx) = ActorClient::new(10);
        let peer = peer_state(&client, Some(Index::new(7)));

        assert_eq!(peer.next_and_previous_log_index(), (Index::new(8), Some(Index::new(7))));
        assert_eq!(peer.matched(), None);

        let empty_leader = peer_state(&client, None);
        assert_eq!(empty_leader.next_and_previous_log_index(), (Index::new(1), None));
    }

    #[tokio::test]
    async fn success_advances_matched_and_next() {
        let (client, _rx) = ActorClient::new(10);
        let mut peer = peer_state(&client, Some(Index::new(3)));

        // Heartbeat success proves a match up to the previous entry.
        send_and_receive(
            &mut peer,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(3)),
                num_entries_replicated: 0,
            },
        );
        assert_eq!(peer.matched(), Some(Index::new(3)));
        assert_eq!(peer.next_and_previous_log_index().0, Index::new(4));

        send_and_receive(
            &mut peer,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(3)),
                num_entries_replicated: 5,
            },
        );
        assert_eq!(peer.matched(), Some(Index::new(8)));
        assert_eq!(peer.next_and_previous_log_index().0, Index::new(9));
    }

    #[tokio::test]
    async fn rewind_follows_hint_within_bounds() {
        let (client, _rx) = ActorClient::new(10);
        let mut peer = peer_state(&client, Some(Index::new(10)));

        send_and_receive(&mut peer, PeerStateUpdate::PeerLogBehind { suggested_next: Index::new(4) });
        assert_eq!(peer.next_and_previous_log_index().0, Index::new(4));

        // A hint that doesn't move us back still moves back by one.
        send_and_receive(&mut peer, PeerStateUpdate::PeerLogBehind { suggested_next: Index::new(9) });
        assert_eq!(peer.next_and_previous_log_index().0, Index::new(3));

        send_and_receive(
            &mut peer,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(2)),
                num_entries_replicated: 1,
            },
        );
        assert_eq!(peer.matched(), Some(Index::new(3)));

        // Never below what the peer is known to have.
        send_and_receive(&mut peer, PeerStateUpdate::PeerLogBehind { suggested_next: Index::new(1) });
        assert_eq!(peer.next_and_previous_log_index().0, Index::new(4));
        send_and_receive(&mut peer, PeerStateUpdate::PeerLogBehind { suggested_next: Index::new(1) });
        assert_eq!(peer.next_and_previous_log_index().0, Index::new(4));
    }

    #[tokio::test]
    async fn drops_stale_and_unsolicited_replies() {
        let (client, _rx) = ActorClient::new(10);
        let mut peer = peer_state(&client, None);

        let unsolicited = peer.handle_append_entries_result(&logger(), 1, PeerStateUpdate::OtherError);
        assert!(!unsolicited);

        let first = peer.next_seq_no();
        let second = peer.next_seq_no();
        assert!(peer.handle_append_entries_result(&logger(), second, PeerStateUpdate::OtherError));
        assert!(!peer.handle_append_entries_result(
            &logger(),
            first,
            PeerStateUpdate::Success {
                previous_log_entry: None,
                num_entries_replicated: 1,
            }
        ));
        assert_eq!(peer.matched(), None);
    }
}
