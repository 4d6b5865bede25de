use crate::actor::{ActorClient, KillSwitch};
use crate::api::apply_stream::RaftApplyStream;
use crate::api::event_bus::RaftEventListener;
use crate::api::types::RaftEntryId;
use crate::replica::{
    ElectionStateChangeListener, ElectionStateSnapshot, EnqueueForReplicationError, EnqueueForReplicationInput,
};
use crate::transport::LocalNetworkRegistration;
use bytes::Bytes;
use std::io;
use std::sync::Arc;

/// RaftClient is everything the application gets back from `try_create_raft_client()`. The parts
/// are public so they can be moved to different tasks.
pub struct RaftClient {
    pub handle: RaftHandle,
    pub apply_stream: RaftApplyStream,
    pub event_listener: RaftEventListener,
}

impl RaftClient {
    pub fn get_state(&self) -> RaftState {
        self.handle.get_state()
    }

    pub async fn start(&self, command: Bytes) -> Result<RaftEntryId, StartError> {
        self.handle.start(command).await
    }

    pub fn kill(&self) {
        self.handle.kill()
    }

    pub fn is_killed(&self) -> bool {
        self.handle.is_killed()
    }
}

/// The replica's term and whether it believes it is leader.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RaftState {
    pub term: u64,
    pub is_leader: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// Not leader. Retry against `leader` if this replica knows one, otherwise try others.
    #[error("I'm not leader. Last known leader: {leader:?}")]
    NotLeader { leader: Option<String> },

    #[error("Failed to persist log")]
    LocalIoError(io::Error),

    #[error("Replica has been killed")]
    ReplicaExited,
}

/// RaftHandle is the cheap, cloneable part of the client. The replica keeps running while any
/// clone of it is alive, until `kill()`.
#[derive(Clone)]
pub struct RaftHandle {
    actor_client: ActorClient,
    election_state_change_listener: ElectionStateChangeListener,
    kill_switch: KillSwitch,
    network_registration: Option<Arc<LocalNetworkRegistration>>,
}

impl RaftHandle {
    pub(super) fn new(
        actor_client: ActorClient,
        election_state_change_listener: ElectionStateChangeListener,
        kill_switch: KillSwitch,
        network_registration: Option<LocalNetworkRegistration>,
    ) -> Self {
        RaftHandle {
            actor_client,
            election_state_change_listener,
            kill_switch,
            network_registration: network_registration.map(Arc::new),
        }
    }

    /// Never blocks on the replica. The answer may already be stale when it's returned.
    pub fn get_state(&self) -> RaftState {
        let status = self.election_state_change_listener.current();

        RaftState {
            term: status.term.as_u64(),
            is_leader: status.state == ElectionStateSnapshot::Leader,
        }
    }

    /// Proposes `command` for the log. Returns as soon as the leader has appended and persisted it
    /// locally; it isn't committed yet. Watch the apply stream for the commit.
    pub async fn start(&self, command: Bytes) -> Result<RaftEntryId, StartError> {
        if self.is_killed() {
            return Err(StartError::ReplicaExited);
        }

        self.actor_client
            .enqueue_for_replication(EnqueueForReplicationInput { data: command })
            .await
            .map(|output| RaftEntryId {
                term: output.enqueued_term,
                index: output.enqueued_index,
            })
            .map_err(|e| match e {
                EnqueueForReplicationError::NotLeader(leader) => StartError::NotLeader {
                    leader: leader.map(|id| id.into_inner()),
                },
                EnqueueForReplicationError::LocalIoError(io_error) => StartError::LocalIoError(io_error),
                EnqueueForReplicationError::ActorExited => StartError::ReplicaExited,
            })
    }

    /// Stops the replica: no more elections, replication, or applies. Doesn't wait for background
    /// tasks to finish. Idempotent.
    pub fn kill(&self) {
        if self.kill_switch.kill() {
            if let Some(registration) = &self.network_registration {
                registration.deregister();
            }
            self.actor_client.request_shutdown();
        }
    }

    pub fn is_killed(&self) -> bool {
        self.kill_switch.is_killed()
    }
}
