//! stowaway host entry point.
//!
//! Reads one JSON event per stdin line and answers on stdout.
//! Logging goes to stderr to avoid interfering with the protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use stowaway_core::{AppConfig, CacheDb, MemoryStore};
use stowaway_engine::{FetchConfig, HttpNetwork, Network};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

mod bindings;
mod error;
mod handler;
mod protocol;

use handler::Handler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(version = %config.version, db_path = %config.db_path.display(), "starting stowaway host");

    let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(FetchConfig::from(&config))?);
    let handler = if config.in_memory() {
        Handler::new(&config, Arc::new(MemoryStore::new()), network)?
    } else {
        Handler::new(&config, Arc::new(CacheDb::open(&config.db_path).await?), network)?
    };

    if let Err(e) = handler.replay_on_start().await {
        tracing::warn!(error = %e, "startup replay failed");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        for out in handler.handle_line(&line).await {
            stdout.write_all(out.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        stdout.flush().await?;
    }

    tracing::info!("stdin closed; shutting down");
    Ok(())
}
