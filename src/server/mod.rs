// src/server/mod.rs

use crate::config::MasterConfig;
use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{filter::EnvFilter, reload};

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(
    config: MasterConfig,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<()> {
    // 1. Initialize the gateway, metalog replay, and listener.
    let mut server_context = initialization::setup(config, log_reload_handle).await?;

    // 2. Spawn background tasks (operation processor, maintenance, metrics).
    spawner::spawn_all(&mut server_context).await?;

    // 3. Start the main connection acceptance loop. Runs until shutdown.
    connection_loop::run(server_context).await;

    Ok(())
}
