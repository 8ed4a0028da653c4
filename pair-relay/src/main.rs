//! pair-relay binary entry point.
//!
//! Usage:
//! ```bash
//! pair-relay --config pair-relay.toml
//! pair-relay --bind 127.0.0.1:3000
//! pair-relay --help
//! ```

use anyhow::Context;
use clap::Parser;
use pairloc_relay::cleanup::spawn_sweep_task;
use pairloc_relay::config::Config;
use pairloc_relay::error::Result;
use pairloc_relay::http;
use pairloc_relay::server::PairRelay;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pair-relay", version, about = "Pairing and location relay for paired devices")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "pair-relay.toml")]
    config: PathBuf,

    /// Listen address, overriding the configuration file and `PORT`.
    #[arg(short, long)]
    bind: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::from_file_or_default(&args.config)?;

    if let Ok(port) = std::env::var("PORT") {
        config.apply_port_env(&port)?;
    }
    if let Some(bind) = &args.bind {
        config.server.bind_address = bind.clone();
    }

    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let addr = config.bind_addr()?;

    let relay = Arc::new(PairRelay::new(config));
    let sweep = spawn_sweep_task(
        relay.coordinator_arc(),
        relay.rate_limits().clone(),
        relay.config().cleanup.clone(),
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("pair-relay v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);

    let served = http::serve(relay, listener, shutdown_signal()).await;
    sweep.abort();
    served
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    run(Args::parse()).await.context("pair-relay failed")?;
    tracing::info!("pair-relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
