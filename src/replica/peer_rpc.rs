use crate::actor::WeakActorClient;
use crate::replica::{
    AppendEntriesInput, AppendEntriesReplyFromPeer, AppendEntriesReplyFromPeerDescriptor, ReplicaId,
    RequestVoteInput, RequestVoteReplyFromPeer,
};
use crate::transport::{RaftTransport, TransportError};
use std::sync::Arc;
use std::time::Duration;

// Outbound calls run on their own task and report back to the actor as events. The actor
// re-validates every reply against its state at the time the reply arrives.

pub(super) async fn call_request_vote(
    logger: slog::Logger,
    transport: Arc<dyn RaftTransport>,
    peer_id: ReplicaId,
    request: RequestVoteInput,
    rpc_timeout: Duration,
    callback: WeakActorClient,
) {
    let term = request.candidate_term;

    slog::debug!(logger, "ClientWire - {:?}", request);
    let result = match tokio::time::timeout(rpc_timeout, transport.request_vote(&peer_id, request)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(TransportError::Timeout),
    };
    slog::debug!(logger, "ClientWire - {:?}", result);

    let callback_input = RequestVoteReplyFromPeer { peer_id, term, result };
    if callback.notify_request_vote_reply_from_peer(callback_input).await.is_err() {
        slog::debug!(logger, "Dropping RequestVote reply, replica has exited.");
    }
}

pub(super) async fn call_append_entries(
    logger: slog::Logger,
    transport: Arc<dyn RaftTransport>,
    request: AppendEntriesInput,
    descriptor: AppendEntriesReplyFromPeerDescriptor,
    rpc_timeout: Duration,
    callback: WeakActorClient,
) {
    slog::debug!(logger, "ClientWire - {:?}", request);
    let result =
        match tokio::time::timeout(rpc_timeout, transport.append_entries(&descriptor.peer_id, request)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(TransportError::Timeout),
        };
    slog::debug!(logger, "ClientWire - {:?}", result);

    let callback_input = AppendEntriesReplyFromPeer { descriptor, result };
    if callback.notify_append_entries_reply_from_peer(callback_input).await.is_err() {
        slog::debug!(logger, "Dropping AppendEntries reply, replica has exited.");
    }
}
