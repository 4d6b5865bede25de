use crate::actor::Event;
use crate::replica::election::timers::clock::Clock;
use crate::replica::{FollowerTimeoutTick, LeaderTimerTick};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};

pub(super) fn mocked_clock() -> (MockClock, MockClockController) {
    let now = Instant::now();
    let (tx, rx) = watch::channel(now);

    (
        MockClock { current_time: rx },
        MockClockController {
            current_time: tx,
            time_of_instantiation: now,
        },
    )
}

/// MockClock only moves when its controller says so.
#[derive(Clone)]
pub(super) struct MockClock {
    current_time: watch::Receiver<Instant>,
}

#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current_time.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        while *self.current_time.borrow() < deadline {
            if self.current_time.changed().await.is_err() {
                // Controller dropped, time stands still forever.
                std::future::pending::<()>().await;
            }
        }
    }
}

pub(super) struct MockClockController {
    current_time: watch::Sender<Instant>,
    time_of_instantiation: Instant,
}

impl MockClockController {
    pub(super) fn elapsed_time(&self) -> Duration {
        *self.current_time.borrow() - self.time_of_instantiation
    }

    /// Advance in steps smaller than what the test observes. A sleeper only promises to wake up
    /// at or after its deadline, so one big jump wakes it up once, late.
    pub(super) fn advance(&mut self, duration: Duration) {
        let new_now = *self.current_time.borrow() + duration;
        // Ignore send errors: every timer task may have exited already.
        let _ = self.current_time.send(new_now);
    }
}

pub(super) struct TestUtilActor {
    rx: mpsc::Receiver<Event>,
    quiet_period: Duration,
}

impl TestUtilActor {
    pub(super) fn new(actor_queue_rx: mpsc::Receiver<Event>) -> Self {
        TestUtilActor {
            rx: actor_queue_rx,
            quiet_period: Duration::from_millis(10),
        }
    }

    async fn recv(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("Unexpected timeout")
            .expect("Expected event")
    }

    pub(super) async fn assert_leader_heartbeat_event(&mut self, expected: LeaderTimerTick) {
        match self.recv().await {
            Event::LeaderTimer(tick) => assert_eq!(tick, expected),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    pub(super) async fn assert_follower_timeout_event(&mut self, expected: FollowerTimeoutTick) {
        match self.recv().await {
            Event::FollowerTimeout(tick) => assert_eq!(tick, expected),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    pub(super) async fn assert_no_event(&mut self) {
        if let Ok(event) = tokio::time::timeout(self.quiet_period, self.rx.recv()).await {
            panic!("Expected no event, got {:?}", event);
        }
    }
}

#[tokio::test]
async fn mock_clock_wakes_sleepers_in_order() {
    let tick = Duration::from_millis(500);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (mut mock_clock, mut controller) = mocked_clock();
    let start = mock_clock.now();

    tokio::spawn(async move {
        let mut next_wake = start;
        loop {
            next_wake += tick;
            mock_clock.sleep_until(next_wake).await;
            if tx.send(()).is_err() {
                return;
            }
        }
    });

    // Half-tick offset avoids off-by-one reasoning.
    controller.advance(tick / 2);
    assert!(tokio::time::timeout(tick * 2, rx.recv()).await.is_err());

    controller.advance(tick);
    rx.recv().await.unwrap();
    assert!(tokio::time::timeout(tick * 2, rx.recv()).await.is_err());

    // Several ticks at once wake the sleeper once per passed deadline.
    controller.advance(tick * 3);
    for _ in 0..3 {
        rx.recv().await.unwrap();
    }
    assert!(tokio::time::timeout(tick * 2, rx.recv()).await.is_err());

    assert_eq!(controller.elapsed_time(), tick * 9 / 2);
}
