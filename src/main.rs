//! ==============================================================================
//! main.rs - solar-mesh node entry point
//! ==============================================================================
//!
//! purpose:
//!     starts one node of the mesh. the role comes from config (or --role):
//!
//!     sender    sample the panel, transmit to the gateway, obey relay commands
//!     gateway   aggregate readings, upload batches, reap silent senders,
//!               relay backend commands
//!
//! startup order:
//!     1. config (explicit --config path, else config/node.toml, else defaults)
//!     2. logging (RUST_LOG overrides logging.level)
//!     3. radio. a radio that will not come up is fatal; the supervisor
//!        (systemd, docker) restarts the node.
//!     4. role loops until ctrl+c
//!
//! ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use solar_mesh::backend::HttpBackend;
use solar_mesh::config::{NodeConfig, Role};
use solar_mesh::gateway::Gateway;
use solar_mesh::radio::UdpRadio;
use solar_mesh::sender::SenderNode;

#[derive(Parser, Debug)]
#[command(name = "solar-mesh", version, about = "Solar panel sensor mesh node")]
struct Cli {
    /// Path to node.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override node.role
    #[arg(short, long)]
    role: Option<Role>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // step 1: configuration
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::load_or_default()?,
    };
    if let Some(role) = cli.role {
        config.node.role = role;
        config.validate().context("Invalid configuration for requested role")?;
    }

    // step 2: logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("===========================================================");
    tracing::info!("  solar-mesh {} ({:?})", env!("CARGO_PKG_VERSION"), config.node.role);
    tracing::info!("===========================================================");
    config.print_summary();

    // step 3: radio
    let peers = config.radio.peer_table();
    let radio = match UdpRadio::bind(&config.radio.bind, config.radio.mac, peers).await {
        Ok(radio) => Arc::new(radio),
        Err(e) => {
            tracing::error!("fatal: {e}");
            return Err(e.into());
        }
    };

    // step 4: role
    match config.node.role {
        Role::Sender => run_sender(&config, radio).await,
        Role::Gateway => run_gateway(config, radio).await,
    }
}

async fn run_sender(config: &NodeConfig, radio: Arc<UdpRadio>) -> Result<()> {
    #[cfg(feature = "hardware")]
    let hardware = Arc::new(
        solar_mesh::hal::Hal::new(config.sampling.window())
            .context("Failed to initialise sender hardware")?,
    );
    #[cfg(not(feature = "hardware"))]
    let hardware = Arc::new(solar_mesh::hal::MockHal::new());

    let node = SenderNode::new(config, hardware, radio)?;
    tokio::select! {
        result = node.run() => result.context("Sender radio stopped")?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown requested"),
    }
    Ok(())
}

async fn run_gateway(config: NodeConfig, radio: Arc<UdpRadio>) -> Result<()> {
    let backend = match HttpBackend::new(&config.backend) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            tracing::error!("fatal: backend client: {e}");
            return Err(e.into());
        }
    };

    let tasks = Gateway::new(config, radio, backend).spawn();
    tasks
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("ctrl+c handler failed: {e}");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
        })
        .await
        .context("Gateway radio stopped")?;
    Ok(())
}
