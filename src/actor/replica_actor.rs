use crate::actor::KillSwitch;
use crate::commitlog;
use crate::replica;
use std::error::Error;
use std::fmt::Debug;
use tokio::sync::{mpsc, oneshot};

// No disk or network IO is awaited while handling an event. Persistence is synchronous, and
// remote calls are spawned as tasks that report back as new events.
#[derive(Debug)]
pub(crate) enum Event {
    // Leader: Append to log, persist, eagerly replicate.
    // Candidate/Follower: Reject with last known leader.
    Start(
        replica::EnqueueForReplicationInput,
        Callback<replica::EnqueueForReplicationOutput, replica::EnqueueForReplicationError>,
    ),

    // Any role: Grant vote if applicable (includes write to disk). Higher term turns us into follower.
    RequestVote(
        replica::RequestVoteInput,
        Callback<replica::RequestVoteOutput, replica::RequestVoteError>,
    ),

    // Candidate: Count vote. Transition to leader on quorum.
    // Any role: Higher term in reply turns us into follower.
    RequestVoteReplyFromPeer(replica::RequestVoteReplyFromPeer),

    // Any role: Reject stale leader. Otherwise become/stay follower, check consistency, write to
    // disk, advance commit index, respond.
    AppendEntries(
        replica::AppendEntriesInput,
        Callback<replica::AppendEntriesOutput, replica::AppendEntriesError>,
    ),

    // Leader: Update peer progress, advance commit index, send follow-up if peer is behind.
    // Candidate/Follower: discard
    AppendEntriesReplyFromPeer(replica::AppendEntriesReplyFromPeer),

    // Leader: Send AppendEntries to one peer.
    // Candidate/Follower: discard (stale timer)
    LeaderTimer(replica::LeaderTimerTick),

    // Follower/Candidate: Start a new election.
    // Leader: discard (stale timer)
    FollowerTimeout(replica::FollowerTimeoutTick),

    // Drop all replica state and exit.
    Shutdown,
}

pub(crate) struct Callback<O: Debug, E: Error>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    pub(super) fn new(sender: oneshot::Sender<Result<O, E>>) -> Self {
        Callback(sender)
    }

    fn send(self, message: Result<O, E>) {
        // The caller may have given up waiting.
        let _ = self.0.send(message);
    }
}

impl<O: Debug, E: Error> Debug for Callback<O, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callback")
    }
}

/// ReplicaActor is replica logic in actor model.
pub(crate) struct ReplicaActor<L>
where
    L: commitlog::Log<replica::WriteAheadLogEntry>,
{
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    replica: replica::Replica<L>,
    kill_switch: KillSwitch,
}

impl<L> ReplicaActor<L>
where
    L: commitlog::Log<replica::WriteAheadLogEntry> + 'static,
{
    pub(crate) fn new(
        logger: slog::Logger,
        receiver: mpsc::Receiver<Event>,
        replica: replica::Replica<L>,
        kill_switch: KillSwitch,
    ) -> Self {
        ReplicaActor {
            logger,
            receiver,
            replica,
            kill_switch,
        }
    }

    /// Runs until shutdown. Returning drops the replica, which stops every timer, closes the RPC
    /// server, and ends the commit stream.
    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            if self.kill_switch.is_killed() {
                break;
            }
            if let Event::Shutdown = event {
                break;
            }
            self.handle_event(event);
        }

        slog::info!(self.logger, "Replica actor exiting.");
    }

    // This must NOT be async. Any long running work must be spawned on another task
    // and come back as a new event to this actor.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Start(input, callback) => {
                let result = self.replica.handle_enqueue_for_replication(input);
                callback.send(result);
            }
            Event::RequestVote(input, callback) => {
                let result = self.replica.server_handle_request_vote(input);
                callback.send(result);
            }
            Event::RequestVoteReplyFromPeer(reply) => {
                self.replica.handle_request_vote_reply_from_peer(reply);
            }
            Event::AppendEntries(input, callback) => {
                let result = self.replica.server_handle_append_entries(input);
                callback.send(result);
            }
            Event::AppendEntriesReplyFromPeer(reply) => {
                self.replica.handle_append_entries_reply_from_peer(reply);
            }
            Event::LeaderTimer(tick) => {
                self.replica.handle_leader_timer(tick);
            }
            Event::FollowerTimeout(tick) => {
                self.replica.handle_follower_timeout(tick);
            }
            Event::Shutdown => { /* Handled by the event loop */ }
        }
    }
}
