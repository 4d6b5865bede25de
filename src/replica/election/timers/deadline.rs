use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Deadline is the next wake up time, shared between a timer handle (which pushes it back) and
/// its timer task (which consumes it).
#[derive(Clone)]
pub(super) struct Deadline {
    next: Arc<Mutex<Option<Instant>>>,
}

impl Deadline {
    pub(super) fn unset() -> Self {
        Deadline {
            next: Arc::new(Mutex::new(None)),
        }
    }

    pub(super) fn set(&self, instant: Instant) {
        self.next
            .lock()
            .expect("Deadline.set() mutex guard poison")
            .replace(instant);
    }

    /// Returns the pending deadline, leaving it unset. `None` means nobody pushed the deadline back
    /// since the last time the task woke up.
    pub(super) fn take(&self) -> Option<Instant> {
        self.next.lock().expect("Deadline.take() mutex guard poison").take()
    }
}
