use std::collections::HashSet;
use std::fmt;

/// ReplicaId uniquely identifies a member of the cluster.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct ReplicaId(String);

impl ReplicaId {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        ReplicaId(id.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ClusterTracker is the static cluster membership, as seen by the local replica.
#[derive(Clone)]
pub(crate) struct ClusterTracker {
    my_replica_id: ReplicaId,
    peer_ids: HashSet<ReplicaId>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum InvalidCluster {
    #[error("Replica ID {0:?} appears more than once in the cluster")]
    DuplicateMember(ReplicaId),
    #[error("My replica ID {0:?} is not a cluster member")]
    MeNotInCluster(ReplicaId),
}

impl ClusterTracker {
    pub(crate) fn create_valid_cluster(
        my_replica_id: ReplicaId,
        cluster_members: Vec<ReplicaId>,
    ) -> Result<Self, InvalidCluster> {
        let mut seen = HashSet::with_capacity(cluster_members.len());
        for member in cluster_members.into_iter() {
            if seen.contains(&member) {
                return Err(InvalidCluster::DuplicateMember(member));
            }
            seen.insert(member);
        }

        if !seen.remove(&my_replica_id) {
            return Err(InvalidCluster::MeNotInCluster(my_replica_id));
        }

        Ok(ClusterTracker {
            my_replica_id,
            peer_ids: seen,
        })
    }

    pub(crate) fn my_replica_id(&self) -> &ReplicaId {
        &self.my_replica_id
    }

    pub(crate) fn contains_member(&self, replica_id: &ReplicaId) -> bool {
        &self.my_replica_id == replica_id || self.peer_ids.contains(replica_id)
    }

    pub(crate) fn peer_ids(&self) -> HashSet<ReplicaId> {
        self.peer_ids.clone()
    }

    pub(crate) fn iter_peer_ids(&self) -> impl Iterator<Item = &ReplicaId> {
        self.peer_ids.iter()
    }

    pub(crate) fn num_voting_replicas(&self) -> usize {
        self.peer_ids.len() + 1
    }

    /// Strict majority of the voting members, counting ourselves.
    pub(crate) fn quorum_size(&self) -> usize {
        (self.num_voting_replicas() / 2) + 1
    }
}
