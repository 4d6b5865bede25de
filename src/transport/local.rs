use crate::actor::WeakActorClient;
use crate::replica::{
    AppendEntriesError, AppendEntriesInput, AppendEntriesOutput, AppendEntriesReply, ReplicaId, RequestVoteError,
    RequestVoteInput, RequestVoteOutput, RequestVoteReply,
};
use crate::transport::{RaftTransport, TransportError};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const UNRELIABLE_DROP_PROBABILITY: f64 = 0.1;
const UNRELIABLE_MAX_DELAY_MILLIS: u64 = 27;
const LOST_MESSAGE_MAX_DELAY_MILLIS: u64 = 100;

/// LocalNetwork routes Raft RPCs between replicas living in the same process. It can cut
/// replicas off from each other and make delivery lossy, which is what tests need to exercise
/// elections and log repair.
///
/// A lost message is reported back to the caller as a `TransportError` after a short delay, so
/// callers never hang on it.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    state: Arc<Mutex<NetworkState>>,
}

struct NetworkState {
    replicas: HashMap<ReplicaId, RegisteredReplica>,
    disconnected: HashSet<ReplicaId>,
    reliable: bool,
    rpc_count: u64,
    next_generation: u64,
}

impl Default for NetworkState {
    fn default() -> Self {
        NetworkState {
            replicas: HashMap::new(),
            disconnected: HashSet::new(),
            reliable: true,
            rpc_count: 0,
            next_generation: 0,
        }
    }
}

struct RegisteredReplica {
    // Distinguishes a restarted replica from the instance it replaced.
    generation: u64,
    actor_client: WeakActorClient,
}

enum DeliveryPlan {
    Deliver {
        actor_client: WeakActorClient,
        generation: u64,
        delay: Duration,
        drop_reply: bool,
    },
    Lost(TransportError, Duration),
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconnect a replica. A connected replica can send and receive.
    pub fn connect(&self, replica_id: &str) {
        self.lock().disconnected.remove(&ReplicaId::new(replica_id));
    }

    /// Disconnect a replica. It keeps running, but neither its requests nor requests addressed
    /// to it get through. Replies to calls in flight are lost too.
    pub fn disconnect(&self, replica_id: &str) {
        self.lock().disconnected.insert(ReplicaId::new(replica_id));
    }

    pub fn set_reliable(&self, reliable: bool) {
        self.lock().reliable = reliable;
    }

    /// Total number of RPCs sent over this network, including ones that got lost.
    pub fn rpc_count(&self) -> u64 {
        self.lock().rpc_count
    }

    pub(crate) fn register(&self, replica_id: ReplicaId, actor_client: WeakActorClient) -> LocalNetworkRegistration {
        let mut state = self.lock();
        state.next_generation += 1;
        let generation = state.next_generation;
        state.replicas.insert(
            replica_id.clone(),
            RegisteredReplica {
                generation,
                actor_client,
            },
        );

        LocalNetworkRegistration {
            network: self.clone(),
            replica_id,
            generation,
        }
    }

    pub(crate) fn transport_for(&self, my_replica_id: ReplicaId) -> LocalTransport {
        LocalTransport {
            network: self.clone(),
            my_replica_id,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        self.state.lock().expect("LocalNetwork mutex poisoned")
    }

    fn plan_delivery(&self, from: &ReplicaId, to: &ReplicaId) -> DeliveryPlan {
        let mut state = self.lock();
        state.rpc_count += 1;

        let mut rng = rand::thread_rng();
        let lost_delay = Duration::from_millis(rng.gen_range(0..LOST_MESSAGE_MAX_DELAY_MILLIS));

        if state.disconnected.contains(from) || state.disconnected.contains(to) {
            return DeliveryPlan::Lost(TransportError::Unreachable(to.clone()), lost_delay);
        }
        let target = match state.replicas.get(to) {
            Some(target) => target,
            None => return DeliveryPlan::Lost(TransportError::Unreachable(to.clone()), lost_delay),
        };

        if state.reliable {
            return DeliveryPlan::Deliver {
                actor_client: target.actor_client.clone(),
                generation: target.generation,
                delay: Duration::from_millis(0),
                drop_reply: false,
            };
        }

        if rng.gen_bool(UNRELIABLE_DROP_PROBABILITY) {
            return DeliveryPlan::Lost(TransportError::Dropped, lost_delay);
        }

        DeliveryPlan::Deliver {
            actor_client: target.actor_client.clone(),
            generation: target.generation,
            delay: Duration::from_millis(rng.gen_range(0..=UNRELIABLE_MAX_DELAY_MILLIS)),
            drop_reply: rng.gen_bool(UNRELIABLE_DROP_PROBABILITY),
        }
    }

    /// The reply only makes it back if both ends are still connected and the target wasn't
    /// replaced by a restarted instance in the meantime.
    fn can_return_reply(&self, from: &ReplicaId, to: &ReplicaId, generation: u64) -> bool {
        let state = self.lock();
        !state.disconnected.contains(from)
            && !state.disconnected.contains(to)
            && state
                .replicas
                .get(to)
                .map(|target| target.generation == generation)
                .unwrap_or(false)
    }

    fn lost_reply_delay() -> Duration {
        Duration::from_millis(rand::thread_rng().gen_range(0..LOST_MESSAGE_MAX_DELAY_MILLIS))
    }
}

/// Keeps a replica reachable on the `LocalNetwork` until `deregister()` is called.
pub(crate) struct LocalNetworkRegistration {
    network: LocalNetwork,
    replica_id: ReplicaId,
    generation: u64,
}

impl LocalNetworkRegistration {
    /// Idempotent. Doesn't affect a newer instance registered under the same ID.
    pub(crate) fn deregister(&self) {
        let mut state = self.network.lock();
        let is_mine = state
            .replicas
            .get(&self.replica_id)
            .map(|registered| registered.generation == self.generation)
            .unwrap_or(false);
        if is_mine {
            state.replicas.remove(&self.replica_id);
        }
    }
}

/// One replica's view of the `LocalNetwork`.
pub(crate) struct LocalTransport {
    network: LocalNetwork,
    my_replica_id: ReplicaId,
}

impl LocalTransport {
    async fn deliver<T, F, Fut>(&self, peer_id: &ReplicaId, call: F) -> Result<T, TransportError>
    where
        F: FnOnce(WeakActorClient) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        match self.network.plan_delivery(&self.my_replica_id, peer_id) {
            DeliveryPlan::Lost(error, delay) => {
                tokio::time::sleep(delay).await;
                Err(error)
            }
            DeliveryPlan::Deliver {
                actor_client,
                generation,
                delay,
                drop_reply,
            } => {
                tokio::time::sleep(delay).await;
                let reply = call(actor_client).await;

                if drop_reply || !self.network.can_return_reply(&self.my_replica_id, peer_id, generation) {
                    tokio::time::sleep(LocalNetwork::lost_reply_delay()).await;
                    return Err(TransportError::Dropped);
                }

                reply
            }
        }
    }
}

#[async_trait::async_trait]
impl RaftTransport for LocalTransport {
    async fn request_vote(
        &self,
        peer_id: &ReplicaId,
        request: RequestVoteInput,
    ) -> Result<RequestVoteReply, TransportError> {
        let peer = peer_id.clone();
        self.deliver(peer_id, |actor_client| async move {
            convert_request_vote_result(&peer, actor_client.request_vote(request).await)
        })
        .await
    }

    async fn append_entries(
        &self,
        peer_id: &ReplicaId,
        request: AppendEntriesInput,
    ) -> Result<AppendEntriesReply, TransportError> {
        let peer = peer_id.clone();
        self.deliver(peer_id, |actor_client| async move {
            convert_append_entries_result(&peer, actor_client.append_entries(request).await)
        })
        .await
    }
}

fn convert_request_vote_result(
    peer_id: &ReplicaId,
    result: Result<RequestVoteOutput, RequestVoteError>,
) -> Result<RequestVoteReply, TransportError> {
    match result {
        Ok(output) => Ok(RequestVoteReply {
            term: output.term,
            vote_granted: output.vote_granted,
        }),
        Err(RequestVoteError::ActorExited) => Err(TransportError::Unreachable(peer_id.clone())),
        Err(e) => Err(TransportError::ServerFault(e.to_string())),
    }
}

fn convert_append_entries_result(
    peer_id: &ReplicaId,
    result: Result<AppendEntriesOutput, AppendEntriesError>,
) -> Result<AppendEntriesReply, TransportError> {
    match result {
        Ok(_) => Ok(AppendEntriesReply::Success),
        Err(AppendEntriesError::ClientTermOutOfDate(info)) => Ok(AppendEntriesReply::StaleTerm {
            current_term: info.current_term,
        }),
        Err(AppendEntriesError::ServerMissingPreviousLogEntry(hint)) => {
            Ok(AppendEntriesReply::MissingPreviousLogEntry(hint))
        }
        Err(AppendEntriesError::ActorExited) => Err(TransportError::Unreachable(peer_id.clone())),
        Err(e) => Err(TransportError::ServerFault(e.to_string())),
    }
}
