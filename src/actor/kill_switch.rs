use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// KillSwitch is the replica's shared "killed" flag. Flipping it is permanent.
#[derive(Clone, Default)]
pub(crate) struct KillSwitch {
    killed: Arc<AtomicBool>,
}

impl KillSwitch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the call that actually flipped the switch.
    pub(crate) fn kill(&self) -> bool {
        !self.killed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }
}
