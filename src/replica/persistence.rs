use crate::proto::{ProtoLogEntry, ProtoPersistentState, ProtoVote};
use crate::replica::{ReplicaId, Term, WriteAheadLogEntry};
use bytes::Bytes;
use prost::Message;

/// PersistentState is everything a replica must remember across a crash: `currentTerm`,
/// `votedFor` and the log. It is always saved and loaded as a whole.
#[derive(Debug, PartialEq)]
pub(crate) struct PersistentState {
    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<ReplicaId>,
    pub(crate) entries: Vec<WriteAheadLogEntry>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum PersistenceError {
    #[error("Persisted state is not decodable: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("Persisted log entry at index {index} has term {entry_term}, but current term is {current_term}")]
    InvalidEntryTerm {
        index: usize,
        entry_term: u64,
        current_term: u64,
    },
    #[error("Persisted vote has an empty replica ID")]
    EmptyVote,
}

impl PersistentState {
    pub(crate) fn empty() -> Self {
        PersistentState {
            current_term: Term::new(0),
            voted_for: None,
            entries: Vec::new(),
        }
    }

    pub(crate) fn encode(&self) -> Bytes {
        let proto_state = ProtoPersistentState {
            current_term: self.current_term.as_u64(),
            voted_for: self.voted_for.as_ref().map(|replica_id| ProtoVote {
                replica_id: replica_id.as_str().to_string(),
            }),
            entries: self.entries.iter().cloned().map(ProtoLogEntry::from).collect(),
        };

        let mut buf = Vec::with_capacity(proto_state.encoded_len());
        proto_state
            .encode(&mut buf)
            .expect("Encoding into a growable Vec can't run out of capacity");

        Bytes::from(buf)
    }

    /// An absent or empty blob means the replica has never saved anything.
    pub(crate) fn decode(blob: Option<Bytes>) -> Result<Self, PersistenceError> {
        let blob = match blob {
            Some(blob) if !blob.is_empty() => blob,
            _ => return Ok(Self::empty()),
        };

        let proto_state = ProtoPersistentState::decode(blob)?;

        let voted_for = match proto_state.voted_for {
            None => None,
            Some(vote) if vote.replica_id.is_empty() => return Err(PersistenceError::EmptyVote),
            Some(vote) => Some(ReplicaId::new(vote.replica_id)),
        };

        // Every entry was created by a leader of some term no later than ours, and term 0 is
        // never a leader's term.
        let current_term = proto_state.current_term;
        for (i, entry) in proto_state.entries.iter().enumerate() {
            if entry.term == 0 || entry.term > current_term {
                return Err(PersistenceError::InvalidEntryTerm {
                    index: i + 1,
                    entry_term: entry.term,
                    current_term,
                });
            }
        }

        Ok(PersistentState {
            current_term: Term::new(current_term),
            voted_for,
            entries: proto_state.entries.into_iter().map(WriteAheadLogEntry::from).collect(),
        })
    }
}
