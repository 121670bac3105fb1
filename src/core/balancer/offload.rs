// src/core/balancer/offload.rs

use super::{BalancePlan, LoadBalancer, MoveSpec, RangeInfo};
use std::collections::HashSet;

/// Drains an explicit list of source servers onto the remaining live
/// servers. The root range, if held by one of the sources, is moved
/// first.
pub struct OffloadBalancer;

impl LoadBalancer for OffloadBalancer {
    fn name(&self) -> &'static str {
        "Offload"
    }

    fn compute_plan(
        &self,
        generation: u64,
        ranges: &[RangeInfo],
        live_servers: &[String],
        sources: &[String],
        disk_ok: &dyn Fn(&str) -> bool,
    ) -> BalancePlan {
        let sources: HashSet<String> = sources.iter().cloned().collect();
        let mut destinations: Vec<&String> = live_servers
            .iter()
            .filter(|s| disk_ok(s) && !sources.contains(s.as_str()))
            .collect();
        if destinations.is_empty() {
            return BalancePlan { generation, moves: Vec::new() };
        }

        let mut ordered: Vec<&RangeInfo> = ranges.iter().filter(|r| sources.contains(&r.location)).collect();
        ordered.sort_by_key(|r| !r.is_root);

        let mut moves = Vec::new();
        let mut cursor = 0usize;
        for range in ordered {
            let dest = destinations[cursor % destinations.len()];
            moves.push(MoveSpec {
                table: range.table.clone(),
                start_row: range.start_row.clone(),
                end_row: range.end_row.clone(),
                source: range.location.clone(),
                destination: dest.clone(),
            });
            cursor += 1;
        }
        destinations.clear();

        BalancePlan { generation, moves }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_range_moves_first_when_held_by_a_source() {
        let ranges = vec![
            RangeInfo { table: "T".into(), start_row: "a".into(), end_row: "b".into(), is_root: false, location: "rs1".into(), load_estimate: 0.0 },
            RangeInfo { table: "METADATA".into(), start_row: "".into(), end_row: "".into(), is_root: true, location: "rs1".into(), load_estimate: 0.0 },
        ];
        let servers = vec!["rs1".to_string(), "rs2".to_string()];
        let plan = OffloadBalancer.compute_plan(1, &ranges, &servers, &["rs1".to_string()], &|_| true);
        assert!(plan.moves[0].end_row.is_empty() || plan.moves.first().map(|m| m.table == "METADATA").unwrap_or(false));
    }

    #[test]
    fn empty_when_no_eligible_destination_remains() {
        let ranges = vec![RangeInfo { table: "T".into(), start_row: "a".into(), end_row: "b".into(), is_root: false, location: "rs1".into(), load_estimate: 0.0 }];
        let servers = vec!["rs1".to_string()];
        let plan = OffloadBalancer.compute_plan(1, &ranges, &servers, &["rs1".to_string()], &|_| true);
        assert!(plan.moves.is_empty());
    }
}
