//! Conclave binary - runs an in-process debug cluster.
//!
//! In debug mode every peer of the configured cluster runs inside this
//! process, wired together over the in-memory loopback mesh: the cluster
//! generates a joint key, elects a leader, and replicates a few entries.
//! Release deployments embed the library behind a real transport instead.

use clap::Parser;
use conclave::config::ConclaveConfig;
use conclave::crypto::CryptoContext;
use conclave::error::ConclaveError;
use conclave::net::LoopbackMesh;
use conclave::peer::ConsensusPeer;
use conclave::raft::ClientSink;
use conclave::types::PeerId;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conclave")]
#[command(author, version, about = "Replicated consensus core with threshold key generation")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "CONCLAVE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (trace..error)
    #[arg(short, long, env = "CONCLAVE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Cluster size when no configuration file is given
    #[arg(long, default_value_t = 3)]
    cluster_size: usize,
}

struct LogSink {
    id: PeerId,
}

impl ClientSink for LogSink {
    fn deliver(&self, payload: &str) {
        info!(id = self.id, payload, "delivered committed entry");
    }
}

#[tokio::main]
async fn main() -> conclave::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => ConclaveConfig::from_file(path)?,
        None => ConclaveConfig::development(cli.cluster_size),
    };

    if !config.debug {
        return Err(ConclaveError::Config(
            "release mode expects an external transport driving the core; \
             set \"debug\": true to run the in-process cluster"
                .to_string(),
        ));
    }

    run_debug_cluster(&config).await
}

/// Start every peer of the cluster in this process, run the DKG, elect a
/// leader, and replicate a few demonstration entries.
async fn run_debug_cluster(config: &ConclaveConfig) -> conclave::Result<()> {
    let cluster_size = config.peer_count();
    info!(cluster_size, "starting in-process debug cluster");

    let (mesh, inbound_rxs) = LoopbackMesh::new(cluster_size, 4096);
    let mut peers: Vec<Arc<ConsensusPeer>> = Vec::with_capacity(cluster_size);

    for (id, inbound_rx) in inbound_rxs.into_iter().enumerate() {
        let id = id as PeerId;
        let mut node_config = config.clone();
        node_config.id = id;
        let ctx = CryptoContext::with_default_prime();
        let (peer, outbound_rx) =
            ConsensusPeer::new(&node_config, ctx, "debug-session", Arc::new(LogSink { id }))?;
        peer.start(inbound_rx);
        let _ = mesh.attach(id, outbound_rx);
        peers.push(Arc::new(peer));
    }

    // Joint key generation across all peers.
    info!("running distributed key generation");
    let keygen_tasks: Vec<_> = peers
        .iter()
        .map(|peer| {
            let peer = Arc::clone(peer);
            tokio::spawn(async move { peer.run_keygen().await })
        })
        .collect();

    let mut shares = Vec::with_capacity(cluster_size);
    for task in keygen_tasks {
        let share = task
            .await
            .map_err(|e| ConclaveError::Keygen(e.to_string()))??;
        shares.push(share);
    }
    if shares.iter().any(|s| s.public_key != shares[0].public_key) {
        warn!("nodes disagree on the joint public key");
    } else {
        info!(key = ?shares[0].public_key, "distributed key generation complete");
    }

    // Wait for the cluster to elect a leader.
    let leader = wait_for_leader(&peers, Duration::from_secs(10)).await?;
    info!(leader = leader.id(), term = leader.raft().current_term(), "leader elected");

    // Replicate a few entries through the leader.
    for i in 0..3 {
        leader.submit(format!("entry-{i}"));
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    for peer in &peers {
        info!(
            id = peer.id(),
            commit_index = peer.raft().commit_index(),
            last_applied = peer.raft().last_applied(),
            "final node state"
        );
    }

    Ok(())
}

async fn wait_for_leader(
    peers: &[Arc<ConsensusPeer>],
    timeout: Duration,
) -> conclave::Result<Arc<ConsensusPeer>> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Some(leader) = peers.iter().find(|p| p.raft().is_leader()) {
            return Ok(Arc::clone(leader));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Err(ConclaveError::NotLeader { leader: None })
}
