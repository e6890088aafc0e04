//! Boson node daemon
//!
//! Thin front-end over the node API: load a JSON configuration, boot the
//! node, log connectivity transitions, and shut down cleanly on SIGINT.
//! `keygen` and `id` are offline helpers for provisioning identities.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use boson_crypto::KeyPair;
use boson_dht::{Id, Node, NodeConfig};

#[derive(Parser)]
#[command(name = "boson", version, about = "Boson DHT node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a node until interrupted
    Run {
        /// Path to the JSON configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Generate a fresh Ed25519 identity
    Keygen,
    /// Print the node id derived from a configuration's key
    Id {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn initialize_logging() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_logging()?;

    match Cli::parse().command {
        Command::Run { config } => run(config).await,
        Command::Keygen => keygen(),
        Command::Id { config } => print_id(config),
    }
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = NodeConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let node = Node::start(config).await.context("starting node")?;
    info!("node id: {}", node.id());
    info!("node did: {}", node.id().to_did());
    if let Some(addr) = node.addr4() {
        info!("listening on {} (ipv4)", addr);
    }
    if let Some(addr) = node.addr6() {
        info!("listening on {} (ipv6)", addr);
    }

    let mut status = node.subscribe_status();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = status.recv().await {
            info!("{:?} connectivity: {:?}", event.family, event.status);
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for SIGINT")?;
    info!("shutting down");
    watcher.abort();
    node.stop().await.context("stopping node")?;
    Ok(())
}

fn keygen() -> Result<()> {
    let keypair = KeyPair::random();
    let id = Id::of_keypair(&keypair);
    println!("privateKey: {}", hex::encode(keypair.private_key().as_bytes()));
    println!("id:         {}", id.to_base58());
    println!("did:        {}", id.to_did());
    Ok(())
}

fn print_id(config_path: PathBuf) -> Result<()> {
    let config = NodeConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let keypair = config.keypair().context("resolving identity")?;
    let id = Id::of_keypair(&keypair);
    println!("{}", id.to_base58());
    Ok(())
}
