// src/server/spawner.rs

//! Spawns all of the master's long-running background tasks: the
//! operation processor's worker loop, the response manager's expiration
//! sweep, the metrics server, and the periodic load-balance trigger.

use super::context::ServerContext;
use super::metrics_server;
use crate::core::name_service::LockEvent;
use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

/// Default period between automatic balance triggers when
/// `load_balancer_enable` is set; the configured cron-like schedule
/// string is logged but not parsed (no cron dependency carried for a
/// single fixed cadence).
const AUTO_BALANCE_PERIOD: Duration = Duration::from_secs(6 * 3600);

/// Spawns all critical background tasks into the provided JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let shutdown_tx = ctx.shutdown_tx.clone();
    let background_tasks = &mut ctx.background_tasks;
    let gateway = ctx.gateway.clone();

    // --- Metrics Server ---
    if !ctx.config.metrics_bind_addr.is_empty() {
        let metrics_addr = ctx.config.metrics_bind_addr.clone();
        let metrics_gateway = gateway.clone();
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_gateway, metrics_addr, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled (empty metrics_bind_addr).");
    }

    // --- Operation Processor ---
    let processor = gateway.processor.clone();
    let shutdown_rx_processor = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        processor.run(shutdown_rx_processor).await;
        Ok(())
    });

    // --- Response Manager expiration sweep ---
    let responses = gateway.responses.clone();
    let shutdown_rx_responses = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        responses
            .run_expiration_loop(shutdown_rx_responses, |expired| {
                debug!(count = expired.len(), "response records expired unfetched");
            })
            .await;
        Ok(())
    });

    // --- Periodic load balancer trigger ---
    if ctx.config.load_balancer_enable {
        let gateway_balance = gateway.clone();
        let initial_delay = ctx.config.load_balancer_initial_delay;
        let mut shutdown_rx_balance = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(initial_delay) => {}
                _ = shutdown_rx_balance.recv() => return Ok(()),
            }
            loop {
                // Empty algorithm name picks the first configured balancer.
                if let Err(e) = gateway_balance.trigger_balance(String::new()) {
                    debug!(error = %e, "periodic balance trigger failed to submit");
                }
                tokio::select! {
                    _ = tokio::time::sleep(AUTO_BALANCE_PERIOD) => {}
                    _ = shutdown_rx_balance.recv() => return Ok(()),
                }
            }
        });
    }

    // --- Recovery trigger: watches the name service's lock-release stream ---
    {
        let gateway_recovery = gateway.clone();
        let mut shutdown_rx_recovery = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            let mut lock_events = gateway_recovery.name_service.subscribe_lock_events();
            loop {
                let event = tokio::select! {
                    _ = shutdown_rx_recovery.recv() => return Ok(()),
                    event = lock_events.recv() => event,
                };
                let handle = match event {
                    Ok(LockEvent::Released { handle }) => handle,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "lock-event subscriber lagged, some releases were missed");
                        continue;
                    }
                    Err(RecvError::Closed) => return Ok(()),
                };
                // The server's lock file names it directly; a released lock is
                // that proxy's failure-detection trigger (spec §4.3).
                let proxy = handle;
                let barrier = gateway_recovery.recovery_barrier.advance(&proxy, Instant::now());
                let gateway_barrier = gateway_recovery.clone();
                let mut shutdown_rx_barrier = shutdown_tx.subscribe();
                tokio::spawn(async move {
                    let now = Instant::now();
                    if barrier > now {
                        tokio::select! {
                            _ = tokio::time::sleep(barrier - now) => {}
                            _ = shutdown_rx_barrier.recv() => return,
                        }
                    }
                    // A later release (or an explicit clear) superseded this
                    // one; don't trigger recovery for a stale barrier.
                    if gateway_barrier.recovery_barrier.barrier_for(&proxy) != Some(barrier) {
                        return;
                    }
                    if let Err(e) = gateway_barrier.trigger_recover(proxy.clone()) {
                        debug!(proxy = %proxy, error = %e, "recovery trigger failed to submit");
                    }
                });
            }
        });
    }

    info!("All background tasks have been spawned.");
    Ok(())
}
