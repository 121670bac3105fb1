// src/server/initialization.rs

//! Handles the complete master initialization process: opening the
//! metalog, replaying prior operations, and wiring the coordination
//! core's collaborators into a [`Gateway`].

use super::context::ServerContext;
use crate::config::MasterConfig;
use crate::core::balancer::{BalancePlanAuthority, even_ranges::EvenRangesBalancer, load::LoadBalancerAlgorithm, offload::OffloadBalancer};
use crate::core::connection_manager::{ConnectionManager, DiskThreshold, RecoveryBarrier};
use crate::core::metalog::{self, EntityType, MetalogWriter};
use crate::core::name_service::InMemoryNameService;
use crate::core::operation::{OperationProcessor, ProcessorContext};
use crate::core::recovery::RecoveryRegistry;
use crate::core::reference_manager::ReferenceManager;
use crate::core::response_manager::ResponseManager;
use crate::master::Gateway;
use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};

/// Initializes all master components before starting the main loop.
pub async fn setup(
    config: MasterConfig,
    _log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(16);

    tokio::fs::create_dir_all(&config.metalog_dir).await.map_err(|e| {
        anyhow!("Failed to create metalog directory '{}': {}", config.metalog_dir, e)
    })?;
    let metalog_path = metalog::default_metalog_path(&config.metalog_dir);
    let entries = metalog::replay(&metalog_path)?;
    info!(replayed = entries.len(), path = %metalog_path.display(), "metalog replay complete");

    let restored_ops: Vec<_> = entries
        .iter()
        .filter(|e| e.entity_type == EntityType::Operation)
        .map(metalog::decode_operation)
        .collect::<Result<Vec<_>, _>>()?;
    let next_op_id = restored_ops.iter().map(|op| op.id).max().map(|id| id + 1).unwrap_or(1);

    let connections = Arc::new(ConnectionManager::new(DiskThreshold(config.disk_threshold_pct)));
    let balance_authority = Arc::new(BalancePlanAuthority::new());
    let metalog_writer = Arc::new(MetalogWriter::open(&metalog_path)?);
    let name_service = Arc::new(InMemoryNameService::new());
    let responses = Arc::new(ResponseManager::new());
    let recovery = Arc::new(RecoveryRegistry::new());
    let references = Arc::new(ReferenceManager::new());

    let balancers: Vec<Box<dyn crate::core::balancer::LoadBalancer + Send + Sync>> = vec![
        Box::new(EvenRangesBalancer),
        Box::new(LoadBalancerAlgorithm { threshold: config.load_balancer_threshold }),
        Box::new(OffloadBalancer),
    ];

    let next_op_id = Arc::new(AtomicU64::new(next_op_id));
    let (recover_tx, recover_rx) = tokio::sync::mpsc::unbounded_channel();
    let recovery_barrier = Arc::new(RecoveryBarrier::new(config.failover_grace_period));

    let processor_ctx = ProcessorContext {
        connections: connections.clone(),
        balance_authority: balance_authority.clone(),
        metalog: metalog_writer.clone(),
        name_service: name_service.clone(),
        responses: responses.clone(),
        recovery: recovery.clone(),
        references,
        clock_skew_max_us: config.clock_skew_max_us,
        failover_quorum_pct: config.failover_quorum_pct,
        balancers,
        next_op_id,
        recover_tx,
    };
    let processor = Arc::new(OperationProcessor::new(processor_ctx, recover_rx));
    processor.restore(restored_ops);

    let gateway = Arc::new(Gateway::new(
        processor,
        connections,
        balance_authority,
        responses,
        recovery,
        name_service,
        recovery_barrier,
        shutdown_tx.clone(),
        config.request_timeout,
    ));

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("RangeMaster listening on {}", config.bind_addr);

    Ok(ServerContext {
        config,
        gateway,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &MasterConfig) {
    info!(
        "failover quorum {}%, clock skew ceiling {}us, disk threshold {}%",
        config.failover_quorum_pct, config.clock_skew_max_us, config.disk_threshold_pct
    );
    if !config.load_balancer_enable {
        warn!("periodic load balancing is disabled; BALANCE must be triggered manually");
    }
}
