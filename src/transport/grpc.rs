use crate::commitlog::Index;
use crate::proto::grpc_raft_client::GrpcRaftClient;
use crate::proto::{
    proto_append_entries_error, proto_append_entries_result, proto_request_vote_error, proto_request_vote_result,
    ProtoAppendEntriesReq, ProtoAppendEntriesResult, ProtoLogEntry, ProtoRequestVoteReq, ProtoRequestVoteResult,
};
use crate::replica::{
    AppendEntriesInput, AppendEntriesReply, ConflictHint, ReplicaId, RequestVoteInput, RequestVoteReply, Term,
};
use crate::transport::{RaftTransport, TransportError};
use std::collections::HashMap;
use std::net::SocketAddr;
use tonic::transport::{Channel, Endpoint};

/// GrpcTransport holds one lazily connected channel per peer. Nothing is dialed until the first
/// call, and a broken connection is re-established by the channel itself.
pub(crate) struct GrpcTransport {
    peers: HashMap<ReplicaId, GrpcRaftClient<Channel>>,
}

impl GrpcTransport {
    pub(crate) fn new(peer_addrs: HashMap<ReplicaId, SocketAddr>) -> Result<Self, String> {
        let mut peers = HashMap::with_capacity(peer_addrs.len());
        for (peer_id, addr) in peer_addrs {
            let endpoint = Endpoint::from_shared(format!("http://{}", addr))
                .map_err(|e| format!("Invalid address {:?} for peer {:?}: {}", addr, peer_id, e))?;
            let channel = endpoint
                .connect_lazy()
                .map_err(|e| format!("Can't create channel to peer {:?}: {}", peer_id, e))?;
            peers.insert(peer_id, GrpcRaftClient::new(channel));
        }

        Ok(GrpcTransport { peers })
    }

    fn client(&self, peer_id: &ReplicaId) -> Result<GrpcRaftClient<Channel>, TransportError> {
        // Cloning a tonic client is cheap, it shares the underlying channel.
        self.peers
            .get(peer_id)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(peer_id.clone()))
    }
}

#[async_trait::async_trait]
impl RaftTransport for GrpcTransport {
    async fn request_vote(
        &self,
        peer_id: &ReplicaId,
        request: RequestVoteInput,
    ) -> Result<RequestVoteReply, TransportError> {
        let mut client = self.client(peer_id)?;

        let rpc_reply = client
            .request_vote(convert_request_vote_request(request))
            .await
            .map_err(|status| TransportError::Rpc(format!("{:?}", status)))?;

        convert_request_vote_reply(rpc_reply.into_inner())
    }

    async fn append_entries(
        &self,
        peer_id: &ReplicaId,
        request: AppendEntriesInput,
    ) -> Result<AppendEntriesReply, TransportError> {
        let mut client = self.client(peer_id)?;

        let rpc_reply = client
            .append_entries(convert_append_entries_request(request))
            .await
            .map_err(|status| TransportError::Rpc(format!("{:?}", status)))?;

        convert_append_entries_reply(rpc_reply.into_inner())
    }
}

fn convert_log_entry_metadata(metadata: Option<(Term, Index)>) -> (u64, u64) {
    match metadata {
        None => (0, 0),
        Some((term, index)) => (term.as_u64(), index.as_u64()),
    }
}

fn convert_request_vote_request(request: RequestVoteInput) -> ProtoRequestVoteReq {
    let (last_log_entry_term, last_log_entry_index) = convert_log_entry_metadata(request.candidate_last_log_entry);

    ProtoRequestVoteReq {
        client_node_id: request.candidate_id.into_inner(),
        term: request.candidate_term.as_u64(),
        last_log_entry_index,
        last_log_entry_term,
    }
}

fn convert_request_vote_reply(rpc_result: ProtoRequestVoteResult) -> Result<RequestVoteReply, TransportError> {
    match rpc_result.result {
        Some(proto_request_vote_result::Result::Ok(ok)) => Ok(RequestVoteReply {
            term: Term::new(ok.term),
            vote_granted: ok.vote_granted,
        }),
        Some(proto_request_vote_result::Result::Err(err)) => match err.err {
            Some(proto_request_vote_error::Err::ServerFault(fault)) => Err(TransportError::ServerFault(fault.message)),
            None => Err(TransportError::MalformedReply("RequestVote Err without a cause")),
        },
        None => Err(TransportError::MalformedReply("RequestVote Result is empty")),
    }
}

fn convert_append_entries_request(request: AppendEntriesInput) -> ProtoAppendEntriesReq {
    let (previous_log_entry_term, previous_log_entry_index) =
        convert_log_entry_metadata(request.leader_previous_log_entry);

    ProtoAppendEntriesReq {
        client_node_id: request.leader_id.into_inner(),
        term: request.leader_term.as_u64(),
        commit_index: request.leader_commit_index.map(|ci| ci.as_u64()).unwrap_or(0),
        previous_log_entry_term,
        previous_log_entry_index,
        new_entries: request.new_entries.into_iter().map(ProtoLogEntry::from).collect(),
    }
}

fn convert_append_entries_reply(rpc_result: ProtoAppendEntriesResult) -> Result<AppendEntriesReply, TransportError> {
    match rpc_result.result {
        Some(proto_append_entries_result::Result::Ok(_)) => Ok(AppendEntriesReply::Success),
        Some(proto_append_entries_result::Result::Err(err)) => match err.err {
            Some(proto_append_entries_error::Err::StaleTerm(payload)) => Ok(AppendEntriesReply::StaleTerm {
                current_term: Term::new(payload.current_term),
            }),
            Some(proto_append_entries_error::Err::MissingLog(payload)) => {
                Ok(AppendEntriesReply::MissingPreviousLogEntry(ConflictHint {
                    conflict_term: match payload.conflict_term {
                        0 => None,
                        term => Some(Term::new(term)),
                    },
                    conflict_index: Index::from_u64_or_none(payload.conflict_index),
                }))
            }
            Some(proto_append_entries_error::Err::ServerFault(fault)) => {
                Err(TransportError::ServerFault(fault.message))
            }
            // Peer is configured with a different cluster. Nothing we can do but keep trying.
            Some(proto_append_entries_error::Err::ClientNotInCluster(_)) => Err(TransportError::ServerFault(
                "Peer doesn't think we're in the cluster".into(),
            )),
            None => Err(TransportError::MalformedReply("AppendEntries Err without a cause")),
        },
        None => Err(TransportError::MalformedReply("AppendEntries Result is empty")),
    }
}
