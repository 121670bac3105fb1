// src/main.rs

//! The main entry point for the RangeMaster coordination core.

use anyhow::Result;
use rangemaster::config::MasterConfig;
use rangemaster::server;
use std::env;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP: &str = "\
rangemaster - coordination core for a distributed, range-partitioned table store

USAGE:
    rangemaster [OPTIONS]

OPTIONS:
    --config <PATH>          Load configuration from PATH (TOML). Defaults to built-in defaults.
    --logging-level <LEVEL>  Override the log level (trace, debug, info, warn, error).
    --verbose                Shorthand for --logging-level debug.
    --debug                  Shorthand for --logging-level trace.
    --help                   Print this message and exit.
    --help-config             Print recognized configuration keys and their defaults, and exit.
    --version                 Print the version and exit.
";

const HELP_CONFIG: &str = "\
Recognized configuration keys (TOML), with defaults:

  bind_addr                       = \"0.0.0.0:38050\"
  metrics_bind_addr               = \"0.0.0.0:9090\"  (empty string disables the metrics server)
  metalog_dir                     = \"./mml\"
  logging_level                   = \"info\"
  request_timeout_ms              = 30000
  failover_grace_period_ms        = 60000
  failover_timeout_ms             = 600000
  failover_quorum_pct             = 50
  disk_threshold_pct              = 90.0
  load_balancer_enable            = false
  load_balancer_schedule          = \"0 */6 * * *\"
  load_balancer_initial_delay_ms  = 300000
  load_balancer_per_server_delay_ms = 60000
  load_balancer_threshold         = 20.0
  maintenance_interval_ms         = 60000
  merging_compaction_delay_ms     = 300000
  merges_per_interval             = 4
  move_compactions_per_interval   = 2
  low_memory_limit_pct            = 80.0
  memory_limit_pct                = 90.0
  prune_threshold_min             = 4194304
  prune_threshold_max             = 268435456
  clock_skew_max_us               = 8000000
";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version") {
        println!("rangemaster {VERSION}");
        return Ok(());
    }
    if args.iter().any(|a| a == "--help") {
        print!("{HELP}");
        return Ok(());
    }
    if args.iter().any(|a| a == "--help-config") {
        print!("{HELP_CONFIG}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config = match MasterConfig::load(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let log_level = if args.iter().any(|a| a == "--debug") {
        "trace".to_string()
    } else if args.iter().any(|a| a == "--verbose") {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging_level.clone())
    };

    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    let reload_handle = Arc::new(reload_handle);

    if let Err(e) = server::run(config, reload_handle).await {
        error!("Server runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
