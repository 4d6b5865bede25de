use crate::actor::{ActorClient, KillSwitch, ReplicaActor};
use crate::api::apply_stream;
use crate::api::client::{RaftClient, RaftHandle};
use crate::api::event_bus::RaftEventListener;
use crate::api::options::{RaftOptions, RaftOptionsValidated};
use crate::api::persister::Persister;
use crate::api::types::RaftMemberInfo;
use crate::replica::{self, ClusterTracker, InvalidCluster, ReplicaConfig, ReplicaId, ReplicaWiringError};
use crate::server::{self, RpcServer};
use crate::transport::{GrpcTransport, LocalNetwork, RaftTransport};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

const ACTOR_QUEUE_CAPACITY: usize = 64;

/// How replicas reach each other.
pub enum RaftTransportConfig {
    /// Real network. Each replica serves RPCs on its member address and dials its peers there.
    Grpc,
    /// In-process network, for tests and simulations.
    Local(LocalNetwork),
}

pub struct RaftClientConfig {
    pub my_replica_id: String,
    pub cluster_members: Vec<RaftMemberInfo>,
    pub transport: RaftTransportConfig,
    /// Where term, vote and log are saved. Pass a persister holding a previous instance's state to
    /// restart that instance.
    pub persister: Box<dyn Persister>,
    pub info_logger: slog::Logger,
    pub options: RaftOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum RaftClientCreationError {
    #[error("Invalid cluster info: {0}")]
    InvalidClusterInfo(Box<dyn Error + Send + Sync>),
    #[error("Illegal options for configuring client: {0}")]
    IllegalClientOptions(String),
    #[error("my replica ID not in cluster config")]
    MeNotInCluster,
    #[error("Persisted state is corrupt: {0}")]
    CorruptPersistentState(Box<dyn Error + Send + Sync>),
    #[error("Failed to load persisted state: {0:?}")]
    PersistenceIo(io::Error),
    #[error("Failed to set up transport: {0}")]
    TransportInit(String),
}

/// Creates a replica and starts it as a follower. Must be called within a tokio runtime.
pub async fn try_create_raft_client(config: RaftClientConfig) -> Result<RaftClient, RaftClientCreationError> {
    let options = RaftOptionsValidated::try_from(config.options)
        .map_err(|e| RaftClientCreationError::IllegalClientOptions(e.to_string()))?;

    if config.cluster_members.is_empty() {
        return Err(RaftClientCreationError::InvalidClusterInfo("Cluster has no members".into()));
    }
    let my_replica_id = ReplicaId::new(config.my_replica_id);
    let cluster_tracker = ClusterTracker::create_valid_cluster(
        my_replica_id.clone(),
        config
            .cluster_members
            .iter()
            .map(|member| ReplicaId::new(member.replica_id.clone()))
            .collect(),
    )
    .map_err(|e| match e {
        InvalidCluster::MeNotInCluster(_) => RaftClientCreationError::MeNotInCluster,
        e @ InvalidCluster::DuplicateMember(_) => RaftClientCreationError::InvalidClusterInfo(e.into()),
    })?;

    let logger = config.info_logger.new(slog::o!("ReplicaId" => my_replica_id.as_str().to_string()));
    let (actor_client, actor_queue_rx) = ActorClient::new(ACTOR_QUEUE_CAPACITY);
    let kill_switch = KillSwitch::new();

    let replica_config = ReplicaConfig {
        leader_heartbeat_duration: options.leader_heartbeat_duration,
        follower_min_timeout: options.follower_min_timeout,
        follower_max_timeout: options.follower_max_timeout,
        append_entries_timeout: options.leader_append_entries_timeout,
        request_vote_timeout: options.candidate_request_vote_timeout,
        max_entries_per_append: options.max_entries_per_append,
    };

    let (replica, commit_stream, election_state_change_listener, network_registration) = match config.transport {
        RaftTransportConfig::Grpc => {
            let my_server_addr = member_addr(&my_replica_id, &config.cluster_members)
                .ok_or(RaftClientCreationError::MeNotInCluster)?;
            let peer_addrs: HashMap<ReplicaId, SocketAddr> = config
                .cluster_members
                .iter()
                .filter(|member| member.replica_id != my_replica_id.as_str())
                .map(|member| (ReplicaId::new(member.replica_id.clone()), member.raft_rpc_addr()))
                .collect();
            let transport = GrpcTransport::new(peer_addrs).map_err(RaftClientCreationError::TransportInit)?;

            let (server_shutdown_handle, server_shutdown_signal) = server::shutdown_signal();
            let (replica, commit_stream, listener) = replica::create_replica(
                logger.clone(),
                cluster_tracker,
                config.persister,
                Arc::new(transport),
                actor_client.weak(),
                &replica_config,
                Some(server_shutdown_handle),
            )
            .map_err(convert_wiring_error)?;

            let rpc_server = RpcServer::new(logger.clone(), actor_client.weak());
            tokio::spawn(rpc_server.run(my_server_addr, server_shutdown_signal));

            (replica, commit_stream, listener, None)
        }
        RaftTransportConfig::Local(network) => {
            let transport: Arc<dyn RaftTransport> = Arc::new(network.transport_for(my_replica_id.clone()));
            let (replica, commit_stream, listener) = replica::create_replica(
                logger.clone(),
                cluster_tracker,
                config.persister,
                transport,
                actor_client.weak(),
                &replica_config,
                None,
            )
            .map_err(convert_wiring_error)?;

            let registration = network.register(my_replica_id.clone(), actor_client.weak());

            (replica, commit_stream, listener, Some(registration))
        }
    };

    let replica_actor = ReplicaActor::new(logger.clone(), actor_queue_rx, replica, kill_switch.clone());
    tokio::spawn(replica_actor.run_event_loop());

    let apply_stream = apply_stream::spawn_applier(
        logger.new(slog::o!("Task" => "Applier")),
        commit_stream,
        kill_switch.clone(),
        options.apply_channel_capacity,
    );
    let event_listener = RaftEventListener::new(election_state_change_listener.clone());
    let handle = RaftHandle::new(
        actor_client,
        election_state_change_listener,
        kill_switch,
        network_registration,
    );

    slog::info!(logger, "Replica started. Options: {:?}", options);

    Ok(RaftClient {
        handle,
        apply_stream,
        event_listener,
    })
}

fn member_addr(my_replica_id: &ReplicaId, cluster_members: &[RaftMemberInfo]) -> Option<SocketAddr> {
    cluster_members
        .iter()
        .find(|member| member.replica_id == my_replica_id.as_str())
        .map(RaftMemberInfo::raft_rpc_addr)
}

fn convert_wiring_error(error: ReplicaWiringError) -> RaftClientCreationError {
    match error {
        ReplicaWiringError::LoadState(e) => RaftClientCreationError::PersistenceIo(e),
        ReplicaWiringError::CorruptState(e) => RaftClientCreationError::CorruptPersistentState(e.into()),
        ReplicaWiringError::LogInit(e) => RaftClientCreationError::PersistenceIo(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::persister::{MemoryPersister, Persister as _};
    use std::net::Ipv4Addr;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn config(my_replica_id: &str, members: &[&str]) -> RaftClientConfig {
        RaftClientConfig {
            my_replica_id: my_replica_id.to_string(),
            cluster_members: members
                .iter()
                .map(|id| RaftMemberInfo::new(*id, Ipv4Addr::LOCALHOST, 0))
                .collect(),
            transport: RaftTransportConfig::Local(LocalNetwork::new()),
            persister: Box::new(MemoryPersister::new()),
            info_logger: test_logger(),
            options: RaftOptions::default(),
        }
    }

    #[tokio::test]
    async fn rejects_replica_outside_cluster() {
        let result = try_create_raft_client(config("d", &["a", "b", "c"])).await;
        assert!(matches!(result, Err(RaftClientCreationError::MeNotInCluster)));
    }

    #[tokio::test]
    async fn rejects_duplicate_and_empty_membership() {
        let result = try_create_raft_client(config("a", &["a", "b", "b"])).await;
        assert!(matches!(result, Err(RaftClientCreationError::InvalidClusterInfo(_))));

        let result = try_create_raft_client(config("a", &[])).await;
        assert!(matches!(result, Err(RaftClientCreationError::InvalidClusterInfo(_))));
    }

    #[tokio::test]
    async fn rejects_corrupt_persisted_state() {
        let persister = MemoryPersister::new();
        persister.save(bytes::Bytes::from_static(&[0xff, 0xff, 0xff])).unwrap();
        let mut config = config("a", &["a"]);
        config.persister = Box::new(persister);

        let result = try_create_raft_client(config).await;
        assert!(matches!(result, Err(RaftClientCreationError::CorruptPersistentState(_))));
    }

    #[tokio::test]
    async fn new_replica_starts_as_follower_in_term_zero() {
        let mut config = config("a", &["a", "b", "c"]);
        config.options.follower_min_timeout = Some(std::time::Duration::from_secs(10));
        config.options.follower_max_timeout = Some(std::time::Duration::from_secs(11));
        let client = try_create_raft_client(config).await.unwrap();

        let state = client.get_state();
        assert_eq!(state.term, 0);
        assert!(!state.is_leader);

        client.kill();
        assert!(client.is_killed());
        assert!(matches!(
            client.start(bytes::Bytes::from_static(b"x")).await,
            Err(crate::api::client::StartError::ReplicaExited)
        ));
    }
}
