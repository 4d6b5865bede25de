use crate::actor::WeakActorClient;
use crate::api::Persister;
use crate::commitlog::InMemoryLog;
use crate::replica::election::{ElectionConfig, ElectionState};
use crate::replica::local_state::LocalState;
use crate::replica::persistence::{PersistenceError, PersistentState};
use crate::replica::replica::ReplicaConfig;
use crate::replica::{
    write_ahead_log, ClusterTracker, CommitStream, ElectionStateChangeListener, Replica, WriteAheadLogEntry,
};
use crate::server::RpcServerShutdownHandle;
use crate::transport::RaftTransport;
use std::io;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ReplicaWiringError {
    #[error("Failed to load persisted state: {0:?}")]
    LoadState(io::Error),
    #[error("Persisted state is corrupt: {0}")]
    CorruptState(#[from] PersistenceError),
    #[error("Failed to initialize log: {0:?}")]
    LogInit(io::Error),
}

/// Builds a replica from whatever `persister` last saved. A replica that has never saved anything
/// starts at term 0 with an empty log and no vote.
pub(crate) fn create_replica(
    logger: slog::Logger,
    cluster_tracker: ClusterTracker,
    persister: Box<dyn Persister>,
    transport: Arc<dyn RaftTransport>,
    actor_client: WeakActorClient,
    config: &ReplicaConfig,
    server_shutdown_handle: Option<RpcServerShutdownHandle>,
) -> Result<
    (
        Replica<InMemoryLog<WriteAheadLogEntry>>,
        CommitStream,
        ElectionStateChangeListener,
    ),
    ReplicaWiringError,
> {
    let persisted = PersistentState::decode(persister.load().map_err(ReplicaWiringError::LoadState)?)?;
    slog::info!(
        logger,
        "Restored state. Term: {:?}, VotedFor: {:?}, Log length: {}",
        persisted.current_term,
        persisted.voted_for,
        persisted.entries.len()
    );

    let my_replica_id = cluster_tracker.my_replica_id().clone();
    let local_state = LocalState::restore(my_replica_id.clone(), persisted.current_term, persisted.voted_for);

    let (write_ahead_log, commit_stream) =
        write_ahead_log::wired(logger.clone(), InMemoryLog::from_entries(persisted.entries))
            .map_err(ReplicaWiringError::LogInit)?;

    let (election_state, election_state_change_listener) = ElectionState::new_follower(
        ElectionConfig {
            my_replica_id,
            leader_heartbeat_duration: config.leader_heartbeat_duration,
            follower_min_timeout: config.follower_min_timeout,
            follower_max_timeout: config.follower_max_timeout,
        },
        persisted.current_term,
        actor_client.clone(),
    );

    let replica = Replica::new(
        logger,
        cluster_tracker,
        local_state,
        election_state,
        write_ahead_log,
        persister,
        transport,
        actor_client,
        config,
        server_shutdown_handle,
    );

    Ok((replica, commit_stream, election_state_change_listener))
}
