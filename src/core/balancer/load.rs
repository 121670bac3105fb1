// src/core/balancer/load.rs

use super::{BalancePlan, LoadBalancer, MoveSpec, RangeInfo};
use std::collections::HashMap;

/// Moves ranges from servers whose aggregate estimated load sits above
/// `mean + threshold` onto servers below it, recomputing the estimated
/// load of both endpoints after each move so later moves see an
/// up-to-date picture.
pub struct LoadBalancerAlgorithm {
    pub threshold: f64,
}

impl LoadBalancer for LoadBalancerAlgorithm {
    fn name(&self) -> &'static str {
        "Load"
    }

    fn compute_plan(
        &self,
        generation: u64,
        ranges: &[RangeInfo],
        live_servers: &[String],
        _sources: &[String],
        disk_ok: &dyn Fn(&str) -> bool,
    ) -> BalancePlan {
        let mut load_by_server: HashMap<String, f64> = HashMap::new();
        let mut ranges_by_server: HashMap<String, Vec<&RangeInfo>> = HashMap::new();
        for r in ranges {
            if r.is_root {
                continue;
            }
            *load_by_server.entry(r.location.clone()).or_insert(0.0) += r.load_estimate;
            ranges_by_server.entry(r.location.clone()).or_default().push(r);
        }
        for s in live_servers {
            load_by_server.entry(s.clone()).or_insert(0.0);
        }

        let mean = if load_by_server.is_empty() {
            0.0
        } else {
            load_by_server.values().sum::<f64>() / load_by_server.len() as f64
        };
        let high_water = mean + self.threshold;

        let mut moves = Vec::new();
        let mut overloaded: Vec<String> = load_by_server
            .iter()
            .filter(|(_, &load)| load > high_water)
            .map(|(s, _)| s.clone())
            .collect();
        overloaded.sort();

        for source in overloaded.drain(..) {
            loop {
                let current_load = *load_by_server.get(&source).unwrap_or(&0.0);
                if current_load <= high_water {
                    break;
                }
                let candidate = ranges_by_server
                    .get(&source)
                    .and_then(|rs| rs.iter().min_by(|a, b| a.load_estimate.partial_cmp(&b.load_estimate).unwrap()));
                let candidate = match candidate {
                    Some(c) => *c,
                    None => break,
                };

                let mut dests: Vec<(String, f64)> = live_servers
                    .iter()
                    .filter(|s| disk_ok(s) && s.as_str() != source)
                    .map(|s| (s.clone(), *load_by_server.get(s).unwrap_or(&0.0)))
                    .collect();
                dests.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
                let dest = match dests.first() {
                    Some((d, load)) if *load < mean => d.clone(),
                    _ => break,
                };

                moves.push(MoveSpec {
                    table: candidate.table.clone(),
                    start_row: candidate.start_row.clone(),
                    end_row: candidate.end_row.clone(),
                    source: source.clone(),
                    destination: dest.clone(),
                });

                *load_by_server.get_mut(&source).unwrap() -= candidate.load_estimate;
                *load_by_server.entry(dest).or_insert(0.0) += candidate.load_estimate;
                if let Some(list) = ranges_by_server.get_mut(&source) {
                    list.retain(|r| !(r.table == candidate.table && r.start_row == candidate.start_row));
                }
            }
        }

        BalancePlan { generation, moves }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(table: &str, start: &str, loc: &str, load: f64) -> RangeInfo {
        RangeInfo {
            table: table.into(),
            start_row: start.into(),
            end_row: format!("{start}z"),
            is_root: false,
            location: loc.into(),
            load_estimate: load,
        }
    }

    #[test]
    fn moves_from_overloaded_to_underloaded() {
        let ranges = vec![
            range("T", "a", "rs1", 100.0),
            range("T", "b", "rs1", 100.0),
            range("T", "c", "rs2", 0.0),
        ];
        let servers = vec!["rs1".to_string(), "rs2".to_string()];
        let plan = LoadBalancerAlgorithm { threshold: 20.0 }.compute_plan(1, &ranges, &servers, &[], &|_| true);
        assert!(!plan.moves.is_empty());
        assert!(plan.moves.iter().all(|m| m.source == "rs1" && m.destination == "rs2"));
    }
}
