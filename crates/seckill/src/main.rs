//! Gateway entry point
//!
//! Connects the four backing stores, wires the core, and runs until
//! interrupted. HTTP routing and request parsing live in the outer layer;
//! this binary only hosts the core and its background loops.

use anyhow::Result;
use clap::{Parser, Subcommand};
use seckill::{EngineConfig, SeckillService};
use tracing::info;

#[derive(Parser)]
#[command(name = "gateway", about = "Flash-sale core gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the core until interrupted
    Start,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    seckill::logging::init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start => start().await,
    }
}

async fn start() -> Result<()> {
    let config = EngineConfig::from_env()?;
    let service = SeckillService::connect(config).await?;
    service.start().await?;
    info!("Gateway running; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    service.shutdown().await;
    Ok(())
}
