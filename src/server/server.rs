use crate::actor::WeakActorClient;
use crate::commitlog::Index;
use crate::proto::grpc_raft_server::{GrpcRaft, GrpcRaftServer};
use crate::proto::{
    proto_append_entries_error, proto_append_entries_result, proto_request_vote_error, proto_request_vote_result,
    ProtoAppendEntriesError, ProtoAppendEntriesReq, ProtoAppendEntriesResult, ProtoAppendEntriesSuccess,
    ProtoClientNotInCluster, ProtoClientStaleTerm, ProtoRequestVoteError, ProtoRequestVoteReq, ProtoRequestVoteResult,
    ProtoRequestVoteSuccess, ProtoServerFault, ProtoServerMissingPreviousLog,
};
use crate::replica::{
    AppendEntriesError, AppendEntriesInput, AppendEntriesOutput, ReplicaId, RequestVoteError, RequestVoteInput,
    RequestVoteOutput, Term, WriteAheadLogEntry,
};
use crate::server::RpcServerShutdownSignal;
use std::net::SocketAddr;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// RpcServer is the type that implements the Raft gRPC interface. It only translates between the
/// wire format and the replica actor's inputs and outputs.
pub(crate) struct RpcServer {
    logger: slog::Logger,
    local_replica: WeakActorClient,
}

impl RpcServer {
    pub(crate) fn new(logger: slog::Logger, local_replica: WeakActorClient) -> Self {
        RpcServer { logger, local_replica }
    }

    pub(crate) async fn run(self, socket_addr: SocketAddr, shutdown_signal: RpcServerShutdownSignal) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", socket_addr);

        let result = Server::builder()
            .add_service(GrpcRaftServer::new(self))
            .serve_with_shutdown(socket_addr, shutdown_signal)
            .await;

        match result {
            Ok(()) => slog::info!(logger, "Server has shut down."),
            Err(e) => slog::error!(logger, "Server exited with error: {:?}", e),
        }
    }

    async fn handle_request_vote(&self, rpc_request: ProtoRequestVoteReq) -> Result<ProtoRequestVoteResult, Status> {
        let app_input = convert_request_vote_input(rpc_request)?;
        let app_result = self.local_replica.request_vote(app_input).await;
        Ok(convert_request_vote_result(app_result))
    }

    async fn handle_append_entries(
        &self,
        rpc_request: ProtoAppendEntriesReq,
    ) -> Result<ProtoAppendEntriesResult, Status> {
        let app_input = convert_append_entries_input(rpc_request)?;
        let app_result = self.local_replica.append_entries(app_input).await;
        Ok(convert_append_entries_result(app_result))
    }
}

#[async_trait::async_trait]
impl GrpcRaft for RpcServer {
    async fn request_vote(
        &self,
        rpc_request_wrapped: Request<ProtoRequestVoteReq>,
    ) -> Result<Response<ProtoRequestVoteResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_request_vote(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn append_entries(
        &self,
        rpc_request_wrapped: Request<ProtoAppendEntriesReq>,
    ) -> Result<Response<ProtoAppendEntriesResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_append_entries(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }
}

fn convert_log_entry_metadata(log_entry_term: u64, log_entry_index: u64) -> Result<Option<(Term, Index)>, Status> {
    match (log_entry_term, log_entry_index) {
        (0, 0) => Ok(None),
        (0, _) => Err(Status::invalid_argument("LogEntryTerm 0 and LogEntryIndex non-0")),
        (_, 0) => Err(Status::invalid_argument("LogEntryIndex 0 and LogEntryTerm non-0")),
        (term, index) => Ok(Some((Term::new(term), Index::new(index)))),
    }
}

fn convert_request_vote_input(rpc_request: ProtoRequestVoteReq) -> Result<RequestVoteInput, Status> {
    let candidate_last_log_entry =
        convert_log_entry_metadata(rpc_request.last_log_entry_term, rpc_request.last_log_entry_index)?;

    Ok(RequestVoteInput {
        candidate_term: Term::new(rpc_request.term),
        candidate_id: ReplicaId::new(rpc_request.client_node_id),
        candidate_last_log_entry,
    })
}

fn request_vote_server_fault(message: String) -> ProtoRequestVoteResult {
    ProtoRequestVoteResult {
        result: Some(proto_request_vote_result::Result::Err(ProtoRequestVoteError {
            err: Some(proto_request_vote_error::Err::ServerFault(ProtoServerFault { message })),
        })),
    }
}

fn convert_request_vote_result(app_result: Result<RequestVoteOutput, RequestVoteError>) -> ProtoRequestVoteResult {
    match app_result {
        Ok(ok) => ProtoRequestVoteResult {
            result: Some(proto_request_vote_result::Result::Ok(ProtoRequestVoteSuccess {
                term: ok.term.as_u64(),
                vote_granted: ok.vote_granted,
            })),
        },
        Err(RequestVoteError::CandidateNotInCluster) => {
            request_vote_server_fault("Candidate is not a member of this cluster".to_string())
        }
        Err(RequestVoteError::ServerIoError(e)) => request_vote_server_fault(format!("Local IO failure: {}", e)),
        Err(RequestVoteError::ActorExited) => {
            request_vote_server_fault("Server internal replica task has exited".to_string())
        }
    }
}

fn convert_append_entries_input(rpc_request: ProtoAppendEntriesReq) -> Result<AppendEntriesInput, Status> {
    let leader_previous_log_entry =
        convert_log_entry_metadata(rpc_request.previous_log_entry_term, rpc_request.previous_log_entry_index)?;

    if rpc_request.new_entries.iter().any(|entry| entry.term == 0) {
        return Err(Status::invalid_argument("New log entry with term 0"));
    }

    Ok(AppendEntriesInput {
        leader_term: Term::new(rpc_request.term),
        leader_id: ReplicaId::new(rpc_request.client_node_id),
        leader_previous_log_entry,
        leader_commit_index: Index::from_u64_or_none(rpc_request.commit_index),
        new_entries: rpc_request
            .new_entries
            .into_iter()
            .map(WriteAheadLogEntry::from)
            .collect(),
    })
}

fn append_entries_error(err: proto_append_entries_error::Err) -> ProtoAppendEntriesResult {
    ProtoAppendEntriesResult {
        result: Some(proto_append_entries_result::Result::Err(ProtoAppendEntriesError {
            err: Some(err),
        })),
    }
}

fn convert_append_entries_result(
    app_result: Result<AppendEntriesOutput, AppendEntriesError>,
) -> ProtoAppendEntriesResult {
    match app_result {
        Ok(_) => ProtoAppendEntriesResult {
            result: Some(proto_append_entries_result::Result::Ok(ProtoAppendEntriesSuccess {})),
        },
        Err(AppendEntriesError::ClientNotInCluster) => {
            append_entries_error(proto_append_entries_error::Err::ClientNotInCluster(ProtoClientNotInCluster {}))
        }
        Err(AppendEntriesError::ClientTermOutOfDate(term_info)) => {
            append_entries_error(proto_append_entries_error::Err::StaleTerm(ProtoClientStaleTerm {
                current_term: term_info.current_term.as_u64(),
            }))
        }
        Err(AppendEntriesError::ServerMissingPreviousLogEntry(hint)) => {
            append_entries_error(proto_append_entries_error::Err::MissingLog(ProtoServerMissingPreviousLog {
                conflict_term: hint.conflict_term.map(|term| term.as_u64()).unwrap_or(0),
                conflict_index: hint.conflict_index.map(|index| index.as_u64()).unwrap_or(0),
            }))
        }
        Err(AppendEntriesError::ServerIoError(e)) => {
            append_entries_error(proto_append_entries_error::Err::ServerFault(ProtoServerFault {
                message: format!("Local IO failure: {}", e),
            }))
        }
        Err(AppendEntriesError::ActorExited) => {
            append_entries_error(proto_append_entries_error::Err::ServerFault(ProtoServerFault {
                message: "Server internal replica task has exited".to_string(),
            }))
        }
    }
}
