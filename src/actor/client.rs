use crate::actor::replica_actor::{Callback, Event};
use crate::replica::{
    AppendEntriesError, AppendEntriesInput, AppendEntriesOutput, AppendEntriesReplyFromPeer,
    EnqueueForReplicationError, EnqueueForReplicationInput, EnqueueForReplicationOutput, FollowerTimeoutTick,
    LeaderTimerTick, RequestVoteError, RequestVoteInput, RequestVoteOutput, RequestVoteReplyFromPeer,
};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, thiserror::Error)]
#[error("Replica actor has exited")]
pub(crate) struct ActorExited;

/// ActorClient is the strong handle to the replica actor. The actor stays alive for as long as a
/// strong handle exists (or until it is told to shut down). Only the application-facing handle is
/// strong; everything internal holds a `WeakActorClient`.
#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);

        (ActorClient { sender: tx }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn enqueue_for_replication(
        &self,
        input: EnqueueForReplicationInput,
    ) -> Result<EnqueueForReplicationOutput, EnqueueForReplicationError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Event::Start(input, Callback::new(tx)))
            .await
            .map_err(|_| EnqueueForReplicationError::ActorExited)?;

        rx.await.map_err(|_| EnqueueForReplicationError::ActorExited)?
    }

    /// Doesn't wait. If the queue is full, the actor sees the kill switch on its next event
    /// instead. If the actor is already gone, there is nothing to do.
    pub(crate) fn request_shutdown(&self) {
        let _ = self.sender.try_send(Event::Shutdown);
    }
}

/// WeakActorClient doesn't keep the actor alive. Every call fails with an `ActorExited` flavored
/// error once the actor is gone.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl WeakActorClient {
    pub(crate) async fn request_vote(&self, input: RequestVoteInput) -> Result<RequestVoteOutput, RequestVoteError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::RequestVote(input, Callback::new(tx)))
            .await
            .map_err(|_| RequestVoteError::ActorExited)?;

        rx.await.map_err(|_| RequestVoteError::ActorExited)?
    }

    pub(crate) async fn append_entries(
        &self,
        input: AppendEntriesInput,
    ) -> Result<AppendEntriesOutput, AppendEntriesError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::AppendEntries(input, Callback::new(tx)))
            .await
            .map_err(|_| AppendEntriesError::ActorExited)?;

        rx.await.map_err(|_| AppendEntriesError::ActorExited)?
    }

    pub(crate) async fn notify_request_vote_reply_from_peer(
        &self,
        reply: RequestVoteReplyFromPeer,
    ) -> Result<(), ActorExited> {
        self.send(Event::RequestVoteReplyFromPeer(reply)).await
    }

    pub(crate) async fn notify_append_entries_reply_from_peer(
        &self,
        reply: AppendEntriesReplyFromPeer,
    ) -> Result<(), ActorExited> {
        self.send(Event::AppendEntriesReplyFromPeer(reply)).await
    }

    pub(crate) async fn leader_timer(&self, tick: LeaderTimerTick) -> Result<(), ActorExited> {
        self.send(Event::LeaderTimer(tick)).await
    }

    pub(crate) async fn follower_timeout(&self, tick: FollowerTimeoutTick) -> Result<(), ActorExited> {
        self.send(Event::FollowerTimeout(tick)).await
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        let sender = self.sender.upgrade().ok_or(ActorExited)?;
        sender.send(event).await.map_err(|_| ActorExited)
    }
}
