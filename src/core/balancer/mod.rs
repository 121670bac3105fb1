// src/core/balancer/mod.rs

//! Load balancer family (EvenRanges, Load, Offload) and the balance plan
//! authority that tracks in-flight moves.

pub mod authority;
pub mod even_ranges;
pub mod load;
pub mod offload;

pub use authority::BalancePlanAuthority;

use serde::{Deserialize, Serialize};

/// A single range currently known to the balancer, scraped from the
/// metadata table's `{Location, StartRow}` columns plus the metrics table.
#[derive(Debug, Clone)]
pub struct RangeInfo {
    pub table: String,
    pub start_row: String,
    pub end_row: String,
    pub is_root: bool,
    pub location: String,
    pub load_estimate: f64,
}

/// One planned move, the unit both `BalancePlan` and the wire protocol's
/// `MOVE_RANGE` request are built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveSpec {
    pub table: String,
    pub start_row: String,
    pub end_row: String,
    pub source: String,
    pub destination: String,
}

/// A set of moves plus the generation they belong to. Generations
/// monotonically advance; a stale generation is ignored by both master and
/// servers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalancePlan {
    pub generation: u64,
    pub moves: Vec<MoveSpec>,
}

/// Destination eligibility: live, under the disk-fill threshold, and not
/// itself a source in this plan.
pub fn eligible_destinations<'a>(
    live_servers: &'a [String],
    disk_ok: impl Fn(&str) -> bool + 'a,
    sources: &'a std::collections::HashSet<String>,
) -> Vec<&'a String> {
    live_servers
        .iter()
        .filter(|s| disk_ok(s) && !sources.contains(s.as_str()))
        .collect()
}

/// Shared interface every concrete algorithm implements to produce a
/// [`BalancePlan`] from the current range snapshot.
pub trait LoadBalancer {
    fn name(&self) -> &'static str;
    /// `generation` is allocated by the caller (`BalancePlanAuthority::next_generation`)
    /// so it advances monotonically across algorithms, not per-algorithm.
    /// `sources` carries the wire request's `args` verbatim; algorithms that
    /// don't need an explicit source list (EvenRanges, Load) ignore it.
    fn compute_plan(
        &self,
        generation: u64,
        ranges: &[RangeInfo],
        live_servers: &[String],
        sources: &[String],
        disk_ok: &dyn Fn(&str) -> bool,
    ) -> BalancePlan;
}
