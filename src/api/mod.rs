//! This mod is meant to hold most of the code for the library's client-facing API.
mod apply_stream;
mod client;
mod event_bus;
mod options;
mod persister;
mod types;
mod wiring;

pub use apply_stream::ApplyMsg;
pub use apply_stream::RaftApplyStream;
pub use client::RaftClient;
pub use client::RaftHandle;
pub use client::RaftState;
pub use client::StartError;
pub use event_bus::RaftElectionState;
pub use event_bus::RaftEvent;
pub use event_bus::RaftEventListener;
pub use options::RaftOptions;
pub use persister::FilePersister;
pub use persister::MemoryPersister;
pub use persister::Persister;
pub use types::RaftEntryId;
pub use types::RaftMemberInfo;
pub use wiring::try_create_raft_client;
pub use wiring::RaftClientConfig;
pub use wiring::RaftClientCreationError;
pub use wiring::RaftTransportConfig;
