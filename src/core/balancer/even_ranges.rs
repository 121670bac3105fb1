// src/core/balancer/even_ranges.rs

use super::{BalancePlan, LoadBalancer, MoveSpec, RangeInfo};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};

/// Minimizes the variance of ranges-per-server, per table, skipping the
/// root range. Only fires when the spread between the fullest and
/// emptiest server (for a given table) is at least 3 ranges.
pub struct EvenRangesBalancer;

const MIN_SPREAD: usize = 3;

impl LoadBalancer for EvenRangesBalancer {
    fn name(&self) -> &'static str {
        "EvenRanges"
    }

    fn compute_plan(
        &self,
        generation: u64,
        ranges: &[RangeInfo],
        live_servers: &[String],
        _sources: &[String],
        disk_ok: &dyn Fn(&str) -> bool,
    ) -> BalancePlan {
        let mut by_table: HashMap<&str, Vec<&RangeInfo>> = HashMap::new();
        for r in ranges {
            if r.is_root {
                continue;
            }
            by_table.entry(r.table.as_str()).or_default().push(r);
        }

        let mut moves = Vec::new();
        for (_table, table_ranges) in by_table {
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for r in &table_ranges {
                *counts.entry(r.location.as_str()).or_insert(0) += 1;
            }
            for s in live_servers {
                counts.entry(s.as_str()).or_insert(0);
            }

            let max = *counts.values().max().unwrap_or(&0);
            let min = *counts.values().min().unwrap_or(&0);
            if max.saturating_sub(min) < MIN_SPREAD {
                continue;
            }

            // Move ranges one at a time off the fullest server onto the
            // emptiest eligible destination until the spread closes.
            loop {
                let (fullest, &full_count) = match counts.iter().max_by_key(|(_, c)| **c) {
                    Some(v) => v,
                    None => break,
                };
                let fullest = fullest.to_string();
                let sources: HashSet<String> = [fullest.clone()].into_iter().collect();

                let mut destinations: Vec<&String> = live_servers
                    .iter()
                    .filter(|s| disk_ok(s) && !sources.contains(s.as_str()))
                    .collect();
                if destinations.is_empty() {
                    break;
                }
                // Shuffle so repeated empty-server destinations don't all
                // receive moved ranges in the same deterministic order,
                // avoiding packing them onto a single empty server.
                destinations.shuffle(&mut rand::thread_rng());
                destinations.sort_by_key(|d| *counts.get(d.as_str()).unwrap_or(&0));
                let dest = destinations[0].clone();

                let dest_count = *counts.get(dest.as_str()).unwrap_or(&0);
                if full_count.saturating_sub(dest_count) < MIN_SPREAD {
                    break;
                }

                if let Some(range) = table_ranges.iter().find(|r| r.location == fullest) {
                    moves.push(MoveSpec {
                        table: range.table.clone(),
                        start_row: range.start_row.clone(),
                        end_row: range.end_row.clone(),
                        source: fullest.clone(),
                        destination: dest.clone(),
                    });
                    *counts.get_mut(fullest.as_str()).unwrap() -= 1;
                    *counts.entry(dest.clone()).or_insert(0) += 1;
                } else {
                    break;
                }

                let max = *counts.values().max().unwrap_or(&0);
                let min = *counts.values().min().unwrap_or(&0);
                if max.saturating_sub(min) < MIN_SPREAD {
                    break;
                }
            }
        }

        BalancePlan { generation, moves }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(table: &str, start: &str, end: &str, loc: &str) -> RangeInfo {
        RangeInfo {
            table: table.into(),
            start_row: start.into(),
            end_row: end.into(),
            is_root: false,
            location: loc.into(),
            load_estimate: 0.0,
        }
    }

    #[test]
    fn skips_when_spread_below_threshold() {
        let ranges = vec![range("T", "a", "b", "rs1"), range("T", "b", "c", "rs2")];
        let servers = vec!["rs1".to_string(), "rs2".to_string()];
        let plan = EvenRangesBalancer.compute_plan(1, &ranges, &servers, &[], &|_| true);
        assert!(plan.moves.is_empty());
    }

    #[test]
    fn moves_ranges_off_overloaded_server() {
        let mut ranges: Vec<RangeInfo> = (0..5).map(|i| range("T", &i.to_string(), &(i + 1).to_string(), "rs1")).collect();
        ranges.push(range("T", "z", "zz", "rs2"));
        let servers = vec!["rs1".to_string(), "rs2".to_string()];
        let plan = EvenRangesBalancer.compute_plan(7, &ranges, &servers, &[], &|_| true);
        assert_eq!(plan.generation, 7);
        assert!(!plan.moves.is_empty());
        assert!(plan.moves.iter().all(|m| m.source == "rs1" && m.destination == "rs2"));
    }
}
