use bytes::Bytes;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const STATE_FILE_NAME: &str = "raft_state.bin";
const TEMP_FILE_NAME: &str = "raft_state.bin.tmp";

/// Persister is durable storage for a replica's term, vote, and log. The replica always saves and
/// loads the whole state as one opaque blob; implementations don't need to understand it.
///
/// `save()` must not return until the blob is durable. The replica replies to RPCs only after
/// `save()` returns.
pub trait Persister: Send + Sync + 'static {
    fn save(&self, state: Bytes) -> Result<(), io::Error>;

    /// Returns `None` if nothing has ever been saved.
    fn load(&self) -> Result<Option<Bytes>, io::Error>;
}

/// MemoryPersister keeps the state in memory. Clones share the same state, so a clone handed to a
/// newly created replica observes everything a killed replica saved.
#[derive(Clone, Default)]
pub struct MemoryPersister {
    state: Arc<Mutex<Option<Bytes>>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size in bytes of the most recently saved state.
    pub fn state_size(&self) -> usize {
        self.state
            .lock()
            .expect("MemoryPersister.state_size() mutex guard poison")
            .as_ref()
            .map(|state| state.len())
            .unwrap_or(0)
    }
}

impl Persister for MemoryPersister {
    fn save(&self, state: Bytes) -> Result<(), io::Error> {
        self.state
            .lock()
            .expect("MemoryPersister.save() mutex guard poison")
            .replace(state);
        Ok(())
    }

    fn load(&self) -> Result<Option<Bytes>, io::Error> {
        Ok(self
            .state
            .lock()
            .expect("MemoryPersister.load() mutex guard poison")
            .clone())
    }
}

/// FilePersister stores the state in a single file inside `directory`. Each save writes a temp
/// file, fsyncs it, and renames it over the previous state, so a crash mid-save leaves the
/// previous state intact.
pub struct FilePersister {
    state_path: PathBuf,
    temp_path: PathBuf,
}

impl FilePersister {
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self, io::Error> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;

        Ok(FilePersister {
            state_path: directory.join(STATE_FILE_NAME),
            temp_path: directory.join(TEMP_FILE_NAME),
        })
    }
}

impl Persister for FilePersister {
    fn save(&self, state: Bytes) -> Result<(), io::Error> {
        let mut file = File::create(&self.temp_path)?;
        file.write_all(&state)?;
        file.sync_all()?;
        fs::rename(&self.temp_path, &self.state_path)?;

        Ok(())
    }

    fn load(&self) -> Result<Option<Bytes>, io::Error> {
        match fs::read(&self.state_path) {
            Ok(contents) if contents.is_empty() => Ok(None),
            Ok(contents) => Ok(Some(Bytes::from(contents))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
