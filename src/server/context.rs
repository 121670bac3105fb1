// src/server/context.rs

use crate::config::MasterConfig;
use crate::master::Gateway;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the master's main loop.
pub struct ServerContext {
    pub config: MasterConfig,
    pub gateway: Arc<Gateway>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
}
