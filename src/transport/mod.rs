//! How a replica reaches its peers. A call either returns the peer's answer or a
//! `TransportError`; the replica treats every error the same way, as "no answer".

mod grpc;
mod local;

pub(crate) use grpc::GrpcTransport;
pub use local::LocalNetwork;
pub(crate) use local::LocalNetworkRegistration;

use crate::replica::{AppendEntriesInput, AppendEntriesReply, ReplicaId, RequestVoteInput, RequestVoteReply};

#[async_trait::async_trait]
pub(crate) trait RaftTransport: Send + Sync + 'static {
    async fn request_vote(
        &self,
        peer_id: &ReplicaId,
        request: RequestVoteInput,
    ) -> Result<RequestVoteReply, TransportError>;

    async fn append_entries(
        &self,
        peer_id: &ReplicaId,
        request: AppendEntriesInput,
    ) -> Result<AppendEntriesReply, TransportError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub(crate) enum TransportError {
    #[error("Peer {0:?} is unknown or unreachable")]
    Unreachable(ReplicaId),
    #[error("Message was lost")]
    Dropped,
    #[error("Timed out waiting for reply")]
    Timeout,
    #[error("RPC failed: {0}")]
    Rpc(String),
    #[error("Peer replied with a server fault: {0}")]
    ServerFault(String),
    #[error("Malformed reply: {0}")]
    MalformedReply(&'static str),
}
