use crate::commitlog;
use crate::proto::ProtoLogEntry;
use crate::replica::Term;
use bytes::Bytes;

/// A single entry of the replicated log: the leader term it was created in plus the
/// application's opaque command.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct WriteAheadLogEntry {
    pub(crate) term: Term,
    pub(crate) data: Bytes,
}

impl commitlog::Entry for WriteAheadLogEntry {}

impl From<ProtoLogEntry> for WriteAheadLogEntry {
    fn from(proto_entry: ProtoLogEntry) -> Self {
        WriteAheadLogEntry {
            term: Term::new(proto_entry.term),
            data: Bytes::from(proto_entry.data),
        }
    }
}

impl From<WriteAheadLogEntry> for ProtoLogEntry {
    fn from(entry: WriteAheadLogEntry) -> Self {
        ProtoLogEntry {
            term: entry.term.as_u64(),
            data: entry.data.to_vec(),
        }
    }
}
