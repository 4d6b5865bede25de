mod actor;
mod api;
mod commitlog;
mod replica;
mod server;
mod transport;
mod proto {
    include!("../generated/raft.rs");
}

pub use api::try_create_raft_client;
pub use api::ApplyMsg;
pub use api::FilePersister;
pub use api::MemoryPersister;
pub use api::Persister;
pub use api::RaftApplyStream;
pub use api::RaftClient;
pub use api::RaftClientConfig;
pub use api::RaftClientCreationError;
pub use api::RaftElectionState;
pub use api::RaftEntryId;
pub use api::RaftEvent;
pub use api::RaftEventListener;
pub use api::RaftHandle;
pub use api::RaftMemberInfo;
pub use api::RaftOptions;
pub use api::RaftState;
pub use api::RaftTransportConfig;
pub use api::StartError;
pub use transport::LocalNetwork;

// `crate::{root_mod}` should not have any code. Just `mod` and `pub use` statements. All `mod`
// statements, anywhere, should not be `pub`. Only export `pub` via individual use statements.
