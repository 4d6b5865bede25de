use crate::commitlog::{Entry, Index, Log};
use std::io;

// The whole log lives in memory. Durability is provided one layer up, by persisting the
// replica's state blob after every mutation.
pub struct InMemoryLog<E: Entry> {
    log: Vec<E>,
}

impl<E: Entry> InMemoryLog<E> {
    pub fn new() -> Self {
        Self::from_entries(Vec::new())
    }

    /// Rebuild a log from entries previously read out of durable storage. `entries[0]` lands at
    /// index 1.
    pub fn from_entries(entries: Vec<E>) -> Self {
        InMemoryLog { log: entries }
    }

    fn vec_index(index: Index) -> usize {
        // Log API states that Index starts from 1.
        (index.as_u64() - 1) as usize
    }
}

impl<E: Entry> Log<E> for InMemoryLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        self.log.push(entry);

        Ok(Index::new_usize(self.log.len()))
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        Ok(self.log.get(Self::vec_index(index)).cloned())
    }

    fn read_range(&self, start: Index, max_entries: usize) -> Result<Vec<E>, io::Error> {
        let vec_start = Self::vec_index(start);
        if vec_start >= self.log.len() {
            return Ok(Vec::new());
        }
        let vec_end = self.log.len().min(vec_start.saturating_add(max_entries));

        Ok(self.log[vec_start..vec_end].to_vec())
    }

    fn truncate(&mut self, index: Index) {
        self.log.truncate(Self::vec_index(index))
    }

    fn next_index(&self) -> Index {
        Index::new_usize(self.log.len() + 1)
    }
}
