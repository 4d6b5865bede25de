use crate::actor::WeakActorClient;
use crate::replica::election::timers::clock::{Clock, RealClock};
use crate::replica::election::timers::deadline::Deadline;
use crate::replica::{FollowerTimeoutTick, Term};
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::{Arc, Weak};
use tokio::time::Duration;

/// FollowerTimerHandle keeps a randomized election timeout running for as long as it is alive.
/// Followers push the timeout back on every valid contact from the leader. Dropping the handle
/// stops the timer task.
pub(crate) struct FollowerTimerHandle<C: Clock = RealClock> {
    shared: Arc<Shared<C>>,
}

struct Shared<C: Clock> {
    timeout_range: RangeInclusive<Duration>,
    deadline: Deadline,
    clock: C,
}

struct FollowerTimerTask<C: Clock> {
    weak_shared: Weak<Shared<C>>,
    deadline: Deadline,
    actor_client: WeakActorClient,
    tick: FollowerTimeoutTick,
    clock: C,
}

impl FollowerTimerHandle {
    pub(crate) fn spawn_timer_task(
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: WeakActorClient,
        term: Term,
    ) -> Self {
        let (task, handle) = FollowerTimerTask::new(min_timeout, max_timeout, actor_client, term, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock> FollowerTimerHandle<C> {
    pub(crate) fn reset_timeout(&self) {
        self.shared.push_back_deadline();
    }
}

impl<C: Clock> Shared<C> {
    fn push_back_deadline(&self) {
        let timeout = rand::thread_rng().gen_range(self.timeout_range.clone());
        self.deadline.set(self.clock.now() + timeout);
    }
}

impl<C: Clock> FollowerTimerTask<C> {
    fn new(
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: WeakActorClient,
        term: Term,
        clock: C,
    ) -> (Self, FollowerTimerHandle<C>) {
        let deadline = Deadline::unset();
        let shared = Arc::new(Shared {
            timeout_range: RangeInclusive::new(min_timeout, max_timeout),
            deadline: deadline.clone(),
            clock: clock.clone(),
        });

        // The deadline must be set before the task starts, otherwise it would time out
        // immediately.
        shared.push_back_deadline();

        let task = FollowerTimerTask {
            weak_shared: Arc::downgrade(&shared),
            deadline,
            actor_client,
            tick: FollowerTimeoutTick { term },
            clock,
        };
        let handle = FollowerTimerHandle { shared };

        (task, handle)
    }

    async fn run(mut self) {
        loop {
            match self.deadline.take() {
                Some(wake_time) => {
                    self.clock.sleep_until(wake_time).await;
                }
                None => {
                    // Nobody pushed the deadline back while we slept.
                    let shared = match self.weak_shared.upgrade() {
                        Some(shared) => shared,
                        // No longer follower/candidate of this term.
                        None => return,
                    };

                    if self.actor_client.follower_timeout(self.tick.clone()).await.is_err() {
                        return;
                    }

                    // Re-arm. If the actor starts an election it drops this handle, otherwise we
                    // keep watching.
                    shared.push_back_deadline();
                }
            }
        }
    }
}
