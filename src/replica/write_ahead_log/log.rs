use crate::commitlog;
use crate::commitlog::Index;
use crate::replica::write_ahead_log::commit_stream::CommitStreamPublisher;
use crate::replica::{Term, WriteAheadLogEntry};
use std::io;

/// WriteAheadLog is the raft-specific log facade.
///
/// Note: A log entry has 3 states (not modeled directly in code):
/// 1. Persisted - written locally, not yet replicated to majority
/// 2. Committed - written locally, replicated to majority
/// 3. Applied - a committed entry that has also been handed to the application
///
/// A log entry's state has no global truth. Each replica will have their own local view of what
/// state the log entry is in.
pub(crate) struct WriteAheadLog<L>
where
    L: commitlog::Log<WriteAheadLogEntry>,
{
    // Application's info/debug log.
    logger: slog::Logger,

    // This is the log that we're replicating.
    log: L,
    // Metadata about the highest log entry that we've locally written. It must be updated atomically.
    latest_entry_metadata: Option<(Term, Index)>,

    // Commit stream to publish committed entries to, in index order.
    commit_stream: CommitStreamPublisher,
    // Index of highest log entry known to be committed. None if nothing is committed.
    commit_index: Option<Index>,
    // Index of highest log entry published to the commit stream. None if nothing is applied.
    last_applied_index: Option<Index>,
}

impl<L> WriteAheadLog<L>
where
    L: commitlog::Log<WriteAheadLogEntry>,
{
    /// The log may already hold entries restored from durable storage. Commit and apply progress
    /// are volatile and always start from nothing.
    pub(super) fn new(logger: slog::Logger, log: L, commit_stream: CommitStreamPublisher) -> Result<Self, io::Error> {
        let latest_entry_metadata = match log.next_index().checked_minus(1) {
            None => None,
            Some(latest_index) => log.read(latest_index)?.map(|entry| (entry.term, latest_index)),
        };

        Ok(WriteAheadLog {
            logger,
            log,
            latest_entry_metadata,
            commit_stream,
            commit_index: None,
            last_applied_index: None,
        })
    }

    pub(crate) fn latest_entry(&self) -> Option<(Term, Index)> {
        self.latest_entry_metadata
    }

    pub(crate) fn latest_index(&self) -> Option<Index> {
        self.latest_entry_metadata.map(|(_, index)| index)
    }

    pub(crate) fn read(&self, index: Index) -> Result<Option<WriteAheadLogEntry>, io::Error> {
        self.log.read(index)
    }

    pub(crate) fn read_range(&self, start: Index, max_entries: usize) -> Result<Vec<WriteAheadLogEntry>, io::Error> {
        self.log.read_range(start, max_entries)
    }

    pub(crate) fn all_entries(&self) -> Result<Vec<WriteAheadLogEntry>, io::Error> {
        self.log.read_range(Index::start_index(), usize::MAX)
    }

    fn read_required(&self, index: Index) -> Result<WriteAheadLogEntry, io::Error> {
        match self.read(index)? {
            Some(entry) => Ok(entry),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Expected log entry at index {:?}", index),
            )),
        }
    }

    /// Walks backwards from `index` (which must exist) to the first index holding the same term.
    pub(crate) fn first_index_of_term_at(&self, index: Index) -> Result<Index, io::Error> {
        let term = self.read_required(index)?.term;

        let mut first = index;
        while let Some(previous) = first.checked_minus(1) {
            if self.read_required(previous)?.term != term {
                break;
            }
            first = previous;
        }

        Ok(first)
    }

    /// Highest index holding an entry of exactly `term`, if any. Terms are non-decreasing along
    /// the log, so the scan stops as soon as it walks below `term`.
    pub(crate) fn last_index_of_term(&self, term: Term) -> Result<Option<Index>, io::Error> {
        let mut cursor = self.latest_index();
        while let Some(index) = cursor {
            let entry_term = self.read_required(index)?.term;
            if entry_term == term {
                return Ok(Some(index));
            }
            if entry_term < term {
                return Ok(None);
            }
            cursor = index.checked_minus(1);
        }

        Ok(None)
    }

    /// Remove anything starting at `index` and later.
    pub(crate) fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        if let Some(commit_index) = self.commit_index {
            if index <= commit_index {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "Refusing to truncate committed entries. Truncate index {:?}, commit index {:?}",
                        index, commit_index
                    ),
                ));
            }
        }

        let mut new_latest_entry_metadata = None;
        if let Some(new_latest_entry_index) = index.checked_minus(1) {
            new_latest_entry_metadata = self
                .read(new_latest_entry_index)?
                .map(|latest_entry| (latest_entry.term, new_latest_entry_index));
        }

        self.log.truncate(index);

        self.latest_entry_metadata = new_latest_entry_metadata;
        Ok(())
    }

    pub(crate) fn append(&mut self, entry: WriteAheadLogEntry) -> Result<Index, io::Error> {
        let appended_term = entry.term;
        let appended_index = self.log.append(entry)?;
        // Only update state after log action completes.
        self.latest_entry_metadata = Some((appended_term, appended_index));

        Ok(appended_index)
    }

    pub(crate) fn commit_index(&self) -> Option<Index> {
        self.commit_index
    }

    /// Leader path. Returns true if the commit index moved forward.
    pub(crate) fn ratchet_fwd_commit_index_if_valid(
        &mut self,
        tentative_new_commit_index: Index,
        current_term: Term,
    ) -> Result<bool, io::Error> {
        // A freshly elected leader may know a commit index higher than what the new term's
        // match indexes show so far. That is not a regression, just nothing to do yet.
        if let Some(current_commit_index) = self.commit_index {
            if tentative_new_commit_index <= current_commit_index {
                return Ok(false);
            }
        }

        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        let entry = self.read_required(tentative_new_commit_index)?;
        if entry.term != current_term {
            return Ok(false);
        }

        self.ratchet_fwd_commit_index_panicking(tentative_new_commit_index);

        Ok(true)
    }

    /// Follower path. Returns true if the commit index moved forward. Never moves it backwards.
    pub(crate) fn ratchet_fwd_commit_index(&mut self, new_commit_index: Index) -> bool {
        if matches!(self.commit_index, Some(ci) if ci >= new_commit_index) {
            return false;
        }

        self.ratchet_fwd_commit_index_panicking(new_commit_index);
        true
    }

    fn ratchet_fwd_commit_index_panicking(&mut self, new_commit_index: Index) {
        // Assert we only ratchet commit index forward.
        if let Some(current_commit_index) = self.commit_index {
            assert!(
                new_commit_index > current_commit_index,
                "Can't ratchet commit index backwards. Expected [input] {:?} > {:?} [current]",
                new_commit_index,
                current_commit_index,
            );
        }

        // Assert we only mark as committed if we have the entry locally.
        let latest_locally_written_index = self
            .latest_index()
            .expect("Can't ratchet commit index forward if we don't have any local logs");
        assert!(
            latest_locally_written_index >= new_commit_index,
            "Can't ratchet commit index forwards past our local log. Expected [latest log] {:?} >= {:?} [input]",
            latest_locally_written_index,
            new_commit_index,
        );

        self.commit_index.replace(new_commit_index);
    }

    /// apply_all_committed_entries publishes all committed but unapplied entries in order.
    pub(crate) fn apply_all_committed_entries(&mut self) {
        if let Err(e) = self.try_apply_all_committed_entries() {
            // Entries are already durable. We retry on the next commit index change.
            slog::error!(self.logger, "Failed to apply a log entry. {:?}", e);
        }
    }

    fn try_apply_all_committed_entries(&mut self) -> Result<(), io::Error> {
        let commit_index = match self.commit_index {
            Some(ci) => ci,
            None => return Ok(()),
        };

        let mut next_index = self
            .last_applied_index
            .map(|i| i.plus(1))
            .unwrap_or_else(Index::start_index);

        while next_index <= commit_index {
            let entry = self.read_required(next_index)?;
            self.commit_stream
                .notify_commit(&self.logger, entry.term, next_index, entry.data);
            self.last_applied_index.replace(next_index);
            next_index = next_index.plus(1);
        }

        Ok(())
    }

    pub(crate) fn last_applied_index(&self) -> Option<Index> {
        self.last_applied_index
    }
}
