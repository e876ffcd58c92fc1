//! Epoch 2 node daemon.
//!
//! ```bash
//! epoch2_node --port 2000 --simulate true
//! EPOCH2_EXPERIMENT__READ_TIMEOUT=2h epoch2_node --config epoch2.toml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use epoch2_node::config::Settings;
use epoch2_node::{driver, logging, server, Node};
use figment::providers::Serialized;
use mimalloc::MiMalloc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line overrides; anything not given falls back to file and environment.
#[derive(Parser, Debug)]
#[command(name = "epoch2_node", version, about = "REST node for the BioTek Epoch 2 plate reader")]
struct Cli {
    /// Server hostname
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Use the simulated reader instead of hardware
    #[arg(long)]
    simulate: Option<bool>,

    /// Serial COM port of the reader
    #[arg(long)]
    com_port: Option<u16>,

    /// Settings file (defaults to epoch2.toml when present)
    #[arg(long, short)]
    config: Option<PathBuf>,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut figment = Settings::figment(self.config.as_deref())?;
        if let Some(host) = &self.host {
            figment = figment.merge(Serialized::default("server.host", host));
        }
        if let Some(port) = self.port {
            figment = figment.merge(Serialized::default("server.port", port));
        }
        if let Some(simulate) = self.simulate {
            figment = figment.merge(Serialized::default("instrument.simulate", simulate));
        }
        if let Some(com_port) = self.com_port {
            figment = figment.merge(Serialized::default("instrument.com_port", com_port));
        }
        Ok(Settings::from_figment(figment)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings().context("failed to load settings")?;
    logging::init(&settings.application)?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting epoch2 node");

    let reader = driver::connect(&settings.instrument);
    let bind_addr = settings.server.bind_addr();
    let node = Arc::new(Node::new(settings, reader));
    let status = node.initialize().await;
    info!(%status, "node initialized");

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    server::serve(listener, Arc::clone(&node))
        .await
        .context("server error")?;

    if let Err(err) = node.shutdown().await {
        warn!(error = %err, "instrument shutdown failed");
    }
    info!("epoch2 node stopped");
    Ok(())
}
