// src/core/metrics.rs

//! Defines and registers Prometheus metrics for coordination-core monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
};

lazy_static! {
    // --- Operation Processor ---
    /// Number of operations currently resident in the operation graph.
    pub static ref OPERATION_GRAPH_SIZE: Gauge =
        register_gauge!("rangemaster_operation_graph_size", "Number of operations currently in the graph.").unwrap();
    /// Number of operations runnable right now (no unresolved dependency or obstruction).
    pub static ref OPERATIONS_RUNNABLE: Gauge =
        register_gauge!("rangemaster_operations_runnable", "Number of operations with no unresolved dependency.").unwrap();
    /// Total operations completed, labeled by outcome ("ok" / "error").
    pub static ref OPERATIONS_COMPLETED_TOTAL: CounterVec =
        register_counter_vec!("rangemaster_operations_completed_total", "Total operations completed, by outcome.", &["outcome"]).unwrap();
    /// Latency of a single operation's execute() call.
    pub static ref OPERATION_EXECUTE_SECONDS: Histogram =
        register_histogram!("rangemaster_operation_execute_seconds", "Latency of Operation::execute in seconds.").unwrap();

    // --- Connection Manager ---
    /// Number of range servers currently connected.
    pub static ref CONNECTED_SERVERS: Gauge =
        register_gauge!("rangemaster_connected_servers", "Number of range servers currently connected.").unwrap();
    /// Number of range servers registered but not connected.
    pub static ref AVAILABLE_SERVERS: Gauge =
        register_gauge!("rangemaster_available_servers", "Number of registered range servers currently available.").unwrap();
    /// Total TCP connections accepted on the client-facing listener.
    pub static ref CLIENT_CONNECTIONS_ACCEPTED_TOTAL: Counter =
        register_counter!("rangemaster_client_connections_accepted_total", "Total client TCP connections accepted.").unwrap();

    // --- Balance Plan Authority ---
    /// Current balance plan generation number.
    pub static ref BALANCE_PLAN_GENERATION: Gauge =
        register_gauge!("rangemaster_balance_plan_generation", "Current balance plan generation.").unwrap();
    /// Number of range moves pending completion in the current plan.
    pub static ref BALANCE_MOVES_PENDING: Gauge =
        register_gauge!("rangemaster_balance_moves_pending", "Range moves not yet reported complete.").unwrap();

    // --- Maintenance Scheduler / Queue ---
    /// Depth of the maintenance queue, labeled by level (root/metadata/system/user).
    pub static ref MAINTENANCE_QUEUE_DEPTH: GaugeVec =
        register_gauge_vec!("rangemaster_maintenance_queue_depth", "Maintenance queue depth by level.", &["level"]).unwrap();
    /// Total maintenance tasks dispatched, labeled by kind (compact/split/relinquish/purge).
    pub static ref MAINTENANCE_TASKS_DISPATCHED_TOTAL: CounterVec =
        register_counter_vec!("rangemaster_maintenance_tasks_dispatched_total", "Maintenance tasks dispatched, by kind.", &["kind"]).unwrap();

    // --- Response Manager ---
    /// Number of response records awaiting delivery or expiration.
    pub static ref RESPONSE_RECORDS_PENDING: Gauge =
        register_gauge!("rangemaster_response_records_pending", "Response delivery records awaiting expiration or delivery.").unwrap();

    // --- Metalog ---
    /// Total metalog entries written.
    pub static ref METALOG_WRITES_TOTAL: Counter =
        register_counter!("rangemaster_metalog_writes_total", "Total metalog entries written.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
