//! This module is the raft-specific log facade that wraps the generic commit log. It knows about
//! terms, the commit index, and handing committed entries off to be applied.

mod commit_stream;
mod log;
mod log_entry;
mod wiring;

pub(crate) use commit_stream::CommitStream;
pub(crate) use commit_stream::CommittedEntry;
pub(crate) use log_entry::WriteAheadLogEntry;

pub(crate) use log::WriteAheadLog;
pub(crate) use wiring::wired;
