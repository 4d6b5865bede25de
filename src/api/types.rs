use crate::commitlog::Index;
use crate::replica::Term;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Where a command landed in the log when `start()` accepted it. It only ends up committed at
/// that index if the same leader keeps it there.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RaftEntryId {
    pub(crate) term: Term,
    pub(crate) index: Index,
}

impl RaftEntryId {
    pub fn term(&self) -> u64 {
        self.term.as_u64()
    }

    pub fn index(&self) -> u64 {
        self.index.as_u64()
    }
}

/// A member of the cluster. The address is only used by the gRPC transport.
#[derive(Clone, Debug)]
pub struct RaftMemberInfo {
    pub replica_id: String,
    pub ip_addr: Ipv4Addr,
    pub raft_rpc_port: u16,
}

impl RaftMemberInfo {
    pub fn new(replica_id: impl Into<String>, ip_addr: Ipv4Addr, raft_rpc_port: u16) -> Self {
        RaftMemberInfo {
            replica_id: replica_id.into(),
            ip_addr,
            raft_rpc_port,
        }
    }

    pub(crate) fn raft_rpc_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip_addr, self.raft_rpc_port))
    }
}
