// src/server/metrics_server.rs

use crate::core::metrics::{
    AVAILABLE_SERVERS, BALANCE_PLAN_GENERATION, CONNECTED_SERVERS, OPERATIONS_RUNNABLE,
    OPERATION_GRAPH_SIZE, gather_metrics,
};
use crate::master::Gateway;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Handles HTTP requests to the /metrics endpoint.
///
/// Refreshes the gauges that track live collaborator state before
/// gathering all registered metrics and encoding them in the Prometheus
/// text format.
async fn metrics_handler(gateway: Arc<Gateway>) -> impl IntoResponse {
    CONNECTED_SERVERS.set(gateway.connections.live_count() as f64);
    AVAILABLE_SERVERS.set(gateway.connections.registered_count() as f64);
    OPERATION_GRAPH_SIZE.set(gateway.processor.graph_size() as f64);
    OPERATIONS_RUNNABLE.set(gateway.processor.runnable_count() as f64);
    BALANCE_PLAN_GENERATION.set(gateway.balance_authority.current_generation() as f64);

    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Runs a simple HTTP server to expose Prometheus metrics on /metrics.
pub async fn run_metrics_server(
    gateway: Arc<Gateway>,
    bind_addr: String,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let addr: SocketAddr = match bind_addr.parse() {
        Ok(a) => a,
        Err(e) => {
            error!(%bind_addr, error = %e, "invalid metrics_bind_addr, metrics server disabled");
            return;
        }
    };

    let app = Router::new().route("/metrics", get(move || metrics_handler(gateway.clone())));

    info!("Prometheus metrics server listening on http://{}/metrics", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on {}: {}", addr, e);
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Metrics server shutting down.");
        })
        .await
        .unwrap();
}
