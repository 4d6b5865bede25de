mod clock;
mod deadline;
mod follower_timer;
mod heartbeat_timer;

#[cfg(test)]
mod test_utils;

pub(super) use follower_timer::FollowerTimerHandle;
pub(super) use heartbeat_timer::HeartbeatTimerHandle;
