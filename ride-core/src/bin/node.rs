//! Ride core node: driver actors, one-second scheduler and the ledger store
//!
//! Usage: `ride-node [config.toml]`. Without a path the config comes from
//! `RIDE_*` environment variables.

use ride_core::{spawn_scheduler, Config, Fleet, SystemClock};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let fleet = Arc::new(Fleet::from_config(config, Arc::new(SystemClock))?);
    let scheduler = spawn_scheduler(fleet.clone());
    tracing::info!("Ride node running");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down ride node");
    scheduler.abort();
    fleet.shutdown().await;
    Ok(())
}
