mod election;
mod local_state;
mod peer_rpc;
mod peers;
mod persistence;
mod replica;
mod replica_api;
mod replica_wiring;
mod write_ahead_log;

pub(crate) use election::ElectionStateChangeListener;
pub(crate) use election::ElectionStateSnapshot;
pub(crate) use election::ElectionStatus;
pub(crate) use local_state::Term;
pub(crate) use peers::ClusterTracker;
pub(crate) use peers::InvalidCluster;
pub(crate) use peers::ReplicaId;
pub(crate) use replica::Replica;
pub(crate) use replica::ReplicaConfig;
pub(crate) use replica_api::*;
pub(crate) use replica_wiring::create_replica;
pub(crate) use replica_wiring::ReplicaWiringError;
pub(crate) use write_ahead_log::CommitStream;
pub(crate) use write_ahead_log::CommittedEntry;
pub(crate) use write_ahead_log::WriteAheadLogEntry;
