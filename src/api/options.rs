use std::convert::TryFrom;
use tokio::time::Duration;

/// Tuning knobs. Anything left `None` gets a default suited to a local test cluster.
#[derive(Clone, Debug, Default)]
pub struct RaftOptions {
    pub leader_heartbeat_duration: Option<Duration>,
    pub follower_min_timeout: Option<Duration>,
    pub follower_max_timeout: Option<Duration>,
    pub leader_append_entries_timeout: Option<Duration>,
    pub candidate_request_vote_timeout: Option<Duration>,
    pub max_entries_per_append: Option<usize>,
    pub apply_channel_capacity: Option<usize>,
}

#[derive(Clone, Debug)]
pub(super) struct RaftOptionsValidated {
    pub leader_heartbeat_duration: Duration,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
    pub leader_append_entries_timeout: Duration,
    pub candidate_request_vote_timeout: Duration,
    pub max_entries_per_append: usize,
    pub apply_channel_capacity: usize,
}

impl RaftOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.leader_heartbeat_duration >= self.follower_min_timeout {
            return Err("Follower minimum timeout must be greater than leader's heartbeat");
        }
        if self.follower_min_timeout >= self.follower_max_timeout {
            return Err("Follower minimum timeout must be less than maximum timeout");
        }
        if self.leader_append_entries_timeout >= self.follower_min_timeout {
            return Err("Leader's AppendEntries RPC timeout must be less than the follower's minimum timeout");
        }
        if self.candidate_request_vote_timeout >= self.follower_min_timeout {
            return Err("Candidate's RequestVote RPC timeout must be less than the follower's minimum timeout");
        }
        if self.max_entries_per_append == 0 {
            return Err("Max entries per AppendEntries must be positive");
        }
        if self.apply_channel_capacity == 0 {
            return Err("Apply channel capacity must be positive");
        }

        Ok(())
    }
}

impl TryFrom<RaftOptions> for RaftOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let values = RaftOptionsValidated {
            leader_heartbeat_duration: options.leader_heartbeat_duration.unwrap_or(Duration::from_millis(50)),
            follower_min_timeout: options.follower_min_timeout.unwrap_or(Duration::from_millis(150)),
            follower_max_timeout: options.follower_max_timeout.unwrap_or(Duration::from_millis(300)),
            leader_append_entries_timeout: options
                .leader_append_entries_timeout
                .unwrap_or(Duration::from_millis(100)),
            candidate_request_vote_timeout: options
                .candidate_request_vote_timeout
                .unwrap_or(Duration::from_millis(100)),
            max_entries_per_append: options.max_entries_per_append.unwrap_or(64),
            apply_channel_capacity: options.apply_channel_capacity.unwrap_or(128),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let validated = RaftOptionsValidated::try_from(RaftOptions::default()).unwrap();
        assert_eq!(validated.leader_heartbeat_duration, Duration::from_millis(50));
        assert_eq!(validated.max_entries_per_append, 64);
    }

    #[test]
    fn heartbeat_must_be_shorter_than_follower_timeout() {
        let options = RaftOptions {
            leader_heartbeat_duration: Some(Duration::from_millis(200)),
            follower_min_timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        };

        assert!(RaftOptionsValidated::try_from(options).is_err());
    }

    #[test]
    fn follower_timeout_range_must_be_ordered() {
        let options = RaftOptions {
            follower_min_timeout: Some(Duration::from_millis(400)),
            follower_max_timeout: Some(Duration::from_millis(300)),
            ..Default::default()
        };

        assert!(RaftOptionsValidated::try_from(options).is_err());
    }

    #[test]
    fn counts_must_be_positive() {
        let options = RaftOptions {
            max_entries_per_append: Some(0),
            ..Default::default()
        };
        assert!(RaftOptionsValidated::try_from(options).is_err());

        let options = RaftOptions {
            apply_channel_capacity: Some(0),
            ..Default::default()
        };
        assert!(RaftOptionsValidated::try_from(options).is_err());
    }
}
