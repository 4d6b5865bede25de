use crate::actor::KillSwitch;
use crate::commitlog::Index;
use crate::replica::{CommitStream, CommittedEntry};
use bytes::Bytes;
use tokio::sync::mpsc;

/// ApplyMsg is one committed command, handed to the application in log order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApplyMsg {
    /// Always true for a command. Reserved for non-command messages.
    pub command_valid: bool,
    pub command: Bytes,
    pub index: u64,
}

/// RaftApplyStream yields every committed command exactly once, in strictly increasing index
/// order with no gaps. Returns `None` after the replica is killed.
pub struct RaftApplyStream {
    receiver: mpsc::Receiver<ApplyMsg>,
}

impl RaftApplyStream {
    pub async fn next(&mut self) -> Option<ApplyMsg> {
        self.receiver.recv().await
    }
}

pub(super) fn spawn_applier(
    logger: slog::Logger,
    commit_stream: CommitStream,
    kill_switch: KillSwitch,
    capacity: usize,
) -> RaftApplyStream {
    let (sender, receiver) = mpsc::channel(capacity);
    tokio::spawn(run_applier(logger, commit_stream, sender, kill_switch));

    RaftApplyStream { receiver }
}

// Runs apart from the replica actor, so a slow application never stalls elections or
// replication. It only ever waits on the application.
async fn run_applier(
    logger: slog::Logger,
    mut commit_stream: CommitStream,
    sender: mpsc::Sender<ApplyMsg>,
    kill_switch: KillSwitch,
) {
    let mut last_applied: Option<Index> = None;

    while let Some(entry) = commit_stream.recv().await {
        if kill_switch.is_killed() {
            break;
        }

        let expected = match last_applied {
            Some(index) => index.plus(1),
            None => Index::start_index(),
        };
        if entry.index != expected {
            slog::error!(
                logger,
                "Committed entry out of order. Expected {:?}, got {:?}. Closing apply stream.",
                expected,
                entry.index
            );
            break;
        }

        let CommittedEntry { term, index, data } = entry;
        slog::debug!(logger, "Applying entry {:?} from term {:?}", index, term);
        let message = ApplyMsg {
            command_valid: true,
            command: data,
            index: index.as_u64(),
        };
        if sender.send(message).await.is_err() {
            slog::info!(logger, "Application dropped its apply stream.");
            break;
        }
        last_applied = Some(index);
    }

    slog::debug!(logger, "Applier exited. Last applied: {:?}", last_applied);
}
