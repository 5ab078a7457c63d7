//! xai-node — the XAI full-node binary.
//!
//! Startup sequence:
//!   1. Resolve configuration (JSON file, overridden by CLI flags)
//!   2. Open the data directory; bootstrap genesis on first run
//!   3. Recover state (snapshot fast path, or full chain replay)
//!   4. Subscribe to ledger events and log them
//!   5. Optionally run the mining loop

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use xai_chain::{Coordinator, NodeEvent};
use xai_core::config::{NetworkType, NodeConfig};
use xai_crypto::KeyPair;

#[derive(Parser, Debug)]
#[command(name = "xai-node", version, about = "XAI full node — proof-of-work ledger core")]
struct Args {
    /// Path to a JSON config file. CLI flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for blocks, state snapshot, and checkpoints.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Network to join: mainnet or testnet.
    #[arg(long)]
    network: Option<NetworkType>,

    /// Cap mining difficulty for local test networks.
    #[arg(long)]
    fast_mining: bool,

    /// Difficulty cap applied when fast mining is enabled.
    #[arg(long)]
    max_test_mining_difficulty: Option<u32>,

    /// Mempool capacity override (transactions).
    #[arg(long)]
    mempool_max_size: Option<usize>,

    /// Blocks between checkpoints.
    #[arg(long)]
    checkpoint_interval: Option<u64>,

    /// Run the mining loop.
    #[arg(long)]
    mine: bool,

    /// Hex secret key for the mining identity. A fresh ephemeral key is
    /// generated when mining without one.
    #[arg(long)]
    miner_key: Option<String>,

    /// Per-attempt mining deadline in seconds (0 = none).
    #[arg(long, default_value_t = 0)]
    mining_deadline_secs: u64,
}

fn resolve_config(args: &Args) -> anyhow::Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(network) = args.network {
        config.network_type = network;
    }
    if args.fast_mining {
        config.fast_mining_enabled = true;
    }
    if let Some(cap) = args.max_test_mining_difficulty {
        config.max_test_mining_difficulty = cap;
    }
    if let Some(size) = args.mempool_max_size {
        config.mempool_max_size = size;
    }
    if let Some(interval) = args.checkpoint_interval {
        config.checkpoint_interval = interval;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,xai=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;
    info!(network = ?config.network_type, data_dir = %config.data_dir.display(), "XAI node starting");

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let coordinator =
        Arc::new(Coordinator::open(config.clone()).context("opening ledger coordinator")?);
    let tip = coordinator.get_tip();
    info!(height = tip.height, hash = %tip.hash, "ledger ready");

    // ── Event logging ─────────────────────────────────────────────────────────
    let mut events = coordinator.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(NodeEvent::TipChanged { height, hash }) => {
                    info!(height, %hash, "tip changed");
                }
                Ok(NodeEvent::ReorgCompleted { depth, new_tip }) => {
                    info!(depth, %new_tip, "reorganization completed");
                }
                Ok(NodeEvent::MempoolChanged { added, removed }) => {
                    info!(added = added.len(), removed = removed.len(), "mempool changed");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagged; deliveries coalesced");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // ── Mining loop ───────────────────────────────────────────────────────────
    if args.mine {
        let keypair = match &args.miner_key {
            Some(secret_hex) => KeyPair::from_secret_hex(secret_hex, config.network_type)
                .context("parsing --miner-key")?,
            None => {
                warn!("no --miner-key given; generating an ephemeral mining identity");
                KeyPair::generate(config.network_type)
            }
        };
        info!(address = %keypair.address, "mining as");

        let deadline = (args.mining_deadline_secs > 0)
            .then(|| Duration::from_secs(args.mining_deadline_secs));
        let miner_coordinator = Arc::clone(&coordinator);
        let handle = tokio::task::spawn_blocking(move || loop {
            let per_attempt = deadline.map(|d| Instant::now() + d);
            match miner_coordinator.mine_one(&keypair, per_attempt) {
                Ok(block) => {
                    info!(height = block.height(), hash = %block.hash(), "mined block");
                }
                Err(e) => {
                    warn!(error = %e, "mining attempt failed");
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        });
        handle.await.context("mining loop ended")?;
        return Ok(());
    }

    // Without mining, stay up to serve in-process readers until interrupted.
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    Ok(())
}
