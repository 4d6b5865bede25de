use crate::actor::WeakActorClient;
use crate::replica::election::timers::clock::{Clock, RealClock};
use crate::replica::election::timers::deadline::Deadline;
use crate::replica::{LeaderTimerTick, ReplicaId, Term};
use std::sync::{Arc, Weak};
use tokio::time::Duration;

/// HeartbeatTimerHandle drives a leader's AppendEntries cadence towards a single peer. The timer
/// ticks immediately when spawned and then once per heartbeat duration of silence. Any
/// AppendEntries sent to the peer pushes the next tick back. Dropping the handle stops the task.
pub(crate) struct HeartbeatTimerHandle<C: Clock = RealClock> {
    shared: Arc<Shared<C>>,
}

struct Shared<C: Clock> {
    heartbeat_duration: Duration,
    deadline: Deadline,
    clock: C,
}

struct HeartbeatTimerTask<C: Clock> {
    weak_shared: Weak<Shared<C>>,
    deadline: Deadline,
    actor_client: WeakActorClient,
    tick: LeaderTimerTick,
    clock: C,
}

impl HeartbeatTimerHandle {
    pub(crate) fn spawn_timer_task(
        heartbeat_duration: Duration,
        actor_client: WeakActorClient,
        peer_id: ReplicaId,
        term: Term,
    ) -> Self {
        let (task, handle) = HeartbeatTimerTask::new(heartbeat_duration, actor_client, peer_id, term, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock> HeartbeatTimerHandle<C> {
    pub(crate) fn reset_heartbeat_timer(&self) {
        self.shared.push_back_deadline();
    }
}

impl<C: Clock> Shared<C> {
    fn push_back_deadline(&self) {
        self.deadline.set(self.clock.now() + self.heartbeat_duration);
    }
}

impl<C: Clock> HeartbeatTimerTask<C> {
    fn new(
        heartbeat_duration: Duration,
        actor_client: WeakActorClient,
        peer_id: ReplicaId,
        term: Term,
        clock: C,
    ) -> (Self, HeartbeatTimerHandle<C>) {
        // Left unset, so the first tick is immediate and a new leader asserts itself right away.
        let deadline = Deadline::unset();
        let shared = Arc::new(Shared {
            heartbeat_duration,
            deadline: deadline.clone(),
            clock: clock.clone(),
        });

        let task = HeartbeatTimerTask {
            weak_shared: Arc::downgrade(&shared),
            deadline,
            actor_client,
            tick: LeaderTimerTick { peer_id, term },
            clock,
        };
        let handle = HeartbeatTimerHandle { shared };

        (task, handle)
    }

    async fn run(mut self) {
        loop {
            match self.deadline.take() {
                Some(wake_time) => {
                    self.clock.sleep_until(wake_time).await;
                }
                None => {
                    // Nothing was sent to this peer for a whole heartbeat duration.
                    let shared = match self.weak_shared.upgrade() {
                        Some(shared) => shared,
                        // No longer leader of this term.
                        None => return,
                    };

                    if self.actor_client.leader_timer(self.tick.clone()).await.is_err() {
                        return;
                    }
                    shared.push_back_deadline();
                }
            }
        }
    }
}
