use bytes::Bytes;
use raft_core::{
    try_create_raft_client, FilePersister, RaftClient, RaftClientConfig, RaftMemberInfo, RaftOptions,
    RaftTransportConfig, StartError,
};
use slog::Drain;
use std::error::Error;
use std::net::Ipv4Addr;
use tokio::time::{sleep, timeout, Duration};

const NUM_MEMBERS: usize = 3;
const PORT_BASE: u16 = 5151;

// Runs a three member cluster over gRPC on localhost, replicates a few commands and waits for
// every member to apply them.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let root_logger = create_root_logger_for_stdout();
    let members: Vec<RaftMemberInfo> = (0..NUM_MEMBERS)
        .map(|i| RaftMemberInfo::new(replica_id(i), Ipv4Addr::LOCALHOST, PORT_BASE + i as u16))
        .collect();
    let state_dir = std::env::temp_dir().join(format!("raft-core-demo-{}", std::process::id()));

    let mut clients = Vec::with_capacity(NUM_MEMBERS);
    for i in 0..NUM_MEMBERS {
        let client = try_create_raft_client(RaftClientConfig {
            my_replica_id: replica_id(i),
            cluster_members: members.clone(),
            transport: RaftTransportConfig::Grpc,
            persister: Box::new(FilePersister::new(state_dir.join(replica_id(i)))?),
            info_logger: root_logger.clone(),
            options: RaftOptions::default(),
        })
        .await?;
        clients.push(client);
    }

    let commands = ["x=1", "y=2", "x=3"];
    for command in commands.iter() {
        let index = start_on_leader(&clients, Bytes::from(command.to_string())).await?;
        slog::info!(root_logger, "Started {:?} at index {}", command, index);
    }

    for client in clients.iter_mut() {
        for _ in 0..commands.len() {
            let applied = timeout(Duration::from_secs(5), client.apply_stream.next())
                .await?
                .ok_or("Apply stream closed")?;
            slog::info!(
                root_logger,
                "Applied index {}: {:?}",
                applied.index,
                String::from_utf8_lossy(&applied.command)
            );
        }
    }

    for client in clients.iter() {
        client.kill();
    }
    std::fs::remove_dir_all(&state_dir)?;

    Ok(())
}

async fn start_on_leader(clients: &[RaftClient], command: Bytes) -> Result<u64, Box<dyn Error>> {
    for _ in 0..50 {
        for client in clients.iter() {
            match client.start(command.clone()).await {
                Ok(entry_id) => return Ok(entry_id.index()),
                Err(StartError::NotLeader { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        sleep(Duration::from_millis(100)).await;
    }

    Err("No leader elected".into())
}

fn replica_id(i: usize) -> String {
    format!("replica-{}", i + 1)
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
