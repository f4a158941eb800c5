//! PBFT ledger node
//!
//! Runs one replica behind a TCP listener and an interactive shell.
//!
//! # Example
//!
//! ```bash
//! # Bootstrap peer (owns the genesis entry)
//! pbft-node --id 0 --port 5000
//!
//! # Joining peers, then `add 0 5000` in each shell
//! pbft-node --id 1 --port 5001
//! pbft-node --id 2 --port 5002 --mode two-phase
//! ```

mod shell;

use anyhow::{Context, Result};
use clap::Parser;
use consensus::network::{TcpServer, TcpTransport};
use consensus::{ConsensusMode, PeerId, Replica, ReplicaConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// PBFT ledger node
#[derive(Parser, Debug)]
#[command(name = "pbft-node")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Peer id; peer 0 creates the genesis entry
    #[arg(long)]
    id: Option<u64>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen host; also the host a bare port in `add` resolves to
    #[arg(long)]
    host: Option<IpAddr>,

    /// JSON config file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Consensus mode: two-phase or three-phase
    #[arg(short, long)]
    mode: Option<ConsensusMode>,

    /// Start with corrupted votes
    #[arg(long)]
    byzantine: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn load_config(&self) -> Result<ReplicaConfig> {
        let mut config = match &self.config {
            Some(path) => ReplicaConfig::from_json_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ReplicaConfig::default(),
        };

        if let Some(id) = self.id {
            config.id = PeerId(id);
        }
        config.listen_addr = SocketAddr::new(
            self.host.unwrap_or(config.listen_addr.ip()),
            self.port.unwrap_or(config.listen_addr.port()),
        );
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        config.byzantine |= self.byzantine;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = cli.load_config()?;
    let listen_addr = config.listen_addr;
    info!(
        peer = %config.id,
        %listen_addr,
        mode = %config.mode,
        byzantine = config.byzantine,
        "Node configuration loaded"
    );

    let server = TcpServer::bind(listen_addr)
        .await
        .with_context(|| format!("failed to listen on {}", listen_addr))?;
    let transport = Arc::new(TcpTransport::new(config.connect_timeout()));
    let replica = Replica::new(config, transport);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server.run(replica.clone(), shutdown_rx));

    shell::run(&replica, listen_addr.ip()).await?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    server_task.await.context("listener task failed")?;

    info!("Node stopped");
    Ok(())
}
