// src/config.rs

//! Configuration surface for the coordination core: a `RawConfig` loaded
//! from TOML with every field optional (defaulted), validated into a
//! `MasterConfig` that the rest of the binary consumes.

use crate::core::errors::{MasterError, MasterResult};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_failover_grace_period_ms() -> u64 {
    60_000
}
fn default_failover_timeout_ms() -> u64 {
    600_000
}
fn default_failover_quorum_pct() -> u32 {
    50
}
fn default_disk_threshold_pct() -> f64 {
    90.0
}
fn default_load_balancer_enable() -> bool {
    false
}
fn default_load_balancer_schedule() -> String {
    "0 */6 * * *".to_string()
}
fn default_load_balancer_initial_delay_ms() -> u64 {
    300_000
}
fn default_load_balancer_per_server_delay_ms() -> u64 {
    60_000
}
fn default_load_balancer_threshold() -> f64 {
    20.0
}
fn default_maintenance_interval_ms() -> u64 {
    60_000
}
fn default_merging_compaction_delay_ms() -> u64 {
    300_000
}
fn default_merges_per_interval() -> u32 {
    4
}
fn default_move_compactions_per_interval() -> u32 {
    2
}
fn default_low_memory_limit_pct() -> f64 {
    80.0
}
fn default_memory_limit_pct() -> f64 {
    90.0
}
fn default_prune_threshold_min() -> u64 {
    4 * 1024 * 1024
}
fn default_prune_threshold_max() -> u64 {
    256 * 1024 * 1024
}
fn default_clock_skew_max_us() -> i64 {
    8_000_000
}
fn default_metalog_dir() -> String {
    "./mml".to_string()
}
fn default_bind_addr() -> String {
    "0.0.0.0:38050".to_string()
}
fn default_metrics_bind_addr() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_logging_level() -> String {
    "info".to_string()
}

/// Every field optional, TOML-deserialized as-is; validated into
/// [`MasterConfig`] afterward. Mirrors the teacher's two-struct pattern.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub bind_addr: String,
    pub metrics_bind_addr: String,
    pub metalog_dir: String,
    pub logging_level: String,

    pub request_timeout_ms: u64,

    pub failover_grace_period_ms: u64,
    pub failover_timeout_ms: u64,
    pub failover_quorum_pct: u32,

    pub disk_threshold_pct: f64,

    pub load_balancer_enable: bool,
    pub load_balancer_schedule: String,
    pub load_balancer_initial_delay_ms: u64,
    pub load_balancer_per_server_delay_ms: u64,
    pub load_balancer_threshold: f64,

    pub maintenance_interval_ms: u64,
    pub merging_compaction_delay_ms: u64,
    pub merges_per_interval: u32,
    pub move_compactions_per_interval: u32,
    pub low_memory_limit_pct: f64,
    pub memory_limit_pct: f64,

    pub prune_threshold_min: u64,
    pub prune_threshold_max: u64,

    pub clock_skew_max_us: i64,
}

impl Default for RawConfig {
    fn default() -> Self {
        RawConfig {
            bind_addr: default_bind_addr(),
            metrics_bind_addr: default_metrics_bind_addr(),
            metalog_dir: default_metalog_dir(),
            logging_level: default_logging_level(),
            request_timeout_ms: default_request_timeout_ms(),
            failover_grace_period_ms: default_failover_grace_period_ms(),
            failover_timeout_ms: default_failover_timeout_ms(),
            failover_quorum_pct: default_failover_quorum_pct(),
            disk_threshold_pct: default_disk_threshold_pct(),
            load_balancer_enable: default_load_balancer_enable(),
            load_balancer_schedule: default_load_balancer_schedule(),
            load_balancer_initial_delay_ms: default_load_balancer_initial_delay_ms(),
            load_balancer_per_server_delay_ms: default_load_balancer_per_server_delay_ms(),
            load_balancer_threshold: default_load_balancer_threshold(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
            merging_compaction_delay_ms: default_merging_compaction_delay_ms(),
            merges_per_interval: default_merges_per_interval(),
            move_compactions_per_interval: default_move_compactions_per_interval(),
            low_memory_limit_pct: default_low_memory_limit_pct(),
            memory_limit_pct: default_memory_limit_pct(),
            prune_threshold_min: default_prune_threshold_min(),
            prune_threshold_max: default_prune_threshold_max(),
            clock_skew_max_us: default_clock_skew_max_us(),
        }
    }
}

impl RawConfig {
    pub fn from_file(path: impl AsRef<Path>) -> MasterResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;
        settings.try_deserialize().map_err(MasterError::from)
    }
}

/// Validated, ready-to-use configuration.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub bind_addr: String,
    pub metrics_bind_addr: String,
    pub metalog_dir: String,
    pub logging_level: String,

    pub request_timeout: Duration,

    pub failover_grace_period: Duration,
    pub failover_timeout: Duration,
    pub failover_quorum_pct: u32,

    pub disk_threshold_pct: f64,

    pub load_balancer_enable: bool,
    pub load_balancer_schedule: String,
    pub load_balancer_initial_delay: Duration,
    pub load_balancer_per_server_delay: Duration,
    pub load_balancer_threshold: f64,

    pub maintenance_interval: Duration,
    pub merging_compaction_delay: Duration,
    pub merges_per_interval: u32,
    pub move_compactions_per_interval: u32,
    pub low_memory_limit_pct: f64,
    pub memory_limit_pct: f64,

    pub prune_threshold_min: u64,
    pub prune_threshold_max: u64,

    pub clock_skew_max_us: i64,
}

impl TryFrom<RawConfig> for MasterConfig {
    type Error = MasterError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        if raw.request_timeout_ms == 0 {
            return Err(MasterError::Config("Hypertable.Request.Timeout must be non-zero".into()));
        }
        if raw.failover_quorum_pct == 0 || raw.failover_quorum_pct > 100 {
            return Err(MasterError::Config("Hypertable.Failover.Quorum.Percentage must be in 1..=100".into()));
        }
        if raw.prune_threshold_min == 0 || raw.prune_threshold_min > raw.prune_threshold_max {
            return Err(MasterError::Config(
                "Hypertable.RangeServer.CommitLog.PruneThreshold.Min must be non-zero and <= Max".into(),
            ));
        }
        if raw.clock_skew_max_us <= 0 {
            return Err(MasterError::Config("Hypertable.RangeServer.ClockSkew.Max must be positive".into()));
        }

        Ok(MasterConfig {
            bind_addr: raw.bind_addr,
            metrics_bind_addr: raw.metrics_bind_addr,
            metalog_dir: raw.metalog_dir,
            logging_level: raw.logging_level,
            request_timeout: Duration::from_millis(raw.request_timeout_ms),
            failover_grace_period: Duration::from_millis(raw.failover_grace_period_ms),
            failover_timeout: Duration::from_millis(raw.failover_timeout_ms),
            failover_quorum_pct: raw.failover_quorum_pct,
            disk_threshold_pct: raw.disk_threshold_pct,
            load_balancer_enable: raw.load_balancer_enable,
            load_balancer_schedule: raw.load_balancer_schedule,
            load_balancer_initial_delay: Duration::from_millis(raw.load_balancer_initial_delay_ms),
            load_balancer_per_server_delay: Duration::from_millis(raw.load_balancer_per_server_delay_ms),
            load_balancer_threshold: raw.load_balancer_threshold,
            maintenance_interval: Duration::from_millis(raw.maintenance_interval_ms),
            merging_compaction_delay: Duration::from_millis(raw.merging_compaction_delay_ms),
            merges_per_interval: raw.merges_per_interval,
            move_compactions_per_interval: raw.move_compactions_per_interval,
            low_memory_limit_pct: raw.low_memory_limit_pct,
            memory_limit_pct: raw.memory_limit_pct,
            prune_threshold_min: raw.prune_threshold_min,
            prune_threshold_max: raw.prune_threshold_max,
            clock_skew_max_us: raw.clock_skew_max_us,
        })
    }
}

impl MasterConfig {
    pub fn load(path: Option<impl AsRef<Path>>) -> MasterResult<Self> {
        let raw = match path {
            Some(p) => RawConfig::from_file(p)?,
            None => RawConfig::default(),
        };
        MasterConfig::try_from(raw)
    }

    pub fn recovery_quorum(&self, registered_servers: usize) -> usize {
        ((registered_servers * self.failover_quorum_pct as usize) + 99) / 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        MasterConfig::try_from(RawConfig::default()).unwrap();
    }

    #[test]
    fn zero_quorum_is_rejected() {
        let mut raw = RawConfig::default();
        raw.failover_quorum_pct = 0;
        assert!(MasterConfig::try_from(raw).is_err());
    }

    #[test]
    fn zero_request_timeout_is_rejected() {
        let mut raw = RawConfig::default();
        raw.request_timeout_ms = 0;
        assert!(MasterConfig::try_from(raw).is_err());
    }

    #[test]
    fn recovery_quorum_rounds_up() {
        let config = MasterConfig::try_from(RawConfig { failover_quorum_pct: 50, ..RawConfig::default() }).unwrap();
        assert_eq!(config.recovery_quorum(3), 2);
        assert_eq!(config.recovery_quorum(4), 2);
    }
}
