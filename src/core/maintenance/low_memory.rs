// src/core/maintenance/low_memory.rs

//! Low-memory prioritizer: after the common passes, aggressively purges
//! shadow caches, cell-store indexes, and oversized cell caches in
//! sequence until the memory budget's `needed` reaches zero.

use super::memory_state::MemoryState;
use super::prioritizer::{
    AccessGroupSnapshot, MaintenanceTask, Prioritizer, PrioritizerConfig, QueueLevel, RangeSnapshot, TaskKind, common_passes,
};
use std::collections::HashMap;

pub struct LowMemoryPrioritizer;

impl Prioritizer for LowMemoryPrioritizer {
    fn prioritize(
        &self,
        ranges: &[RangeSnapshot],
        access_groups: &[AccessGroupSnapshot],
        memory: MemoryState,
        config: &PrioritizerConfig,
    ) -> (Vec<MaintenanceTask>, MemoryState) {
        let (mut tasks, mut memory) = common_passes(ranges, access_groups, memory, config);
        if !memory.need_more() {
            return (tasks, memory);
        }

        let range_level: HashMap<(&str, &str), QueueLevel> = ranges
            .iter()
            .map(|r| ((r.table.as_str(), r.start_row.as_str()), r.level))
            .collect();
        let mut priority = tasks.len() as u64;
        let mut next_priority = || {
            let p = priority;
            priority += 1;
            p
        };

        // Shadow-cache purge: ascending by {hits, estimated retention}.
        let mut shadow: Vec<&AccessGroupSnapshot> = access_groups.iter().collect();
        shadow.sort_by_key(|ag| (ag.shadow_cache_hits, ag.estimated_retention));
        for ag in shadow {
            if !memory.need_more() {
                break;
            }
            let level = *range_level.get(&(ag.table.as_str(), ag.start_row.as_str())).unwrap_or(&QueueLevel::User);
            tasks.push(MaintenanceTask {
                table: ag.table.clone(),
                start_row: ag.start_row.clone(),
                access_group: Some(ag.name.clone()),
                kind: TaskKind::ShadowCachePurge,
                level,
                priority: next_priority(),
            });
            memory.decrement_needed(ag.estimated_retention);
        }

        // Cell-store index purge: ordered by most-recent-access time (oldest first).
        let mut index_candidates: Vec<&AccessGroupSnapshot> = access_groups.iter().collect();
        index_candidates.sort_by_key(|ag| ag.last_access_ms);
        for ag in index_candidates {
            if !memory.need_more() {
                break;
            }
            let level = *range_level.get(&(ag.table.as_str(), ag.start_row.as_str())).unwrap_or(&QueueLevel::User);
            tasks.push(MaintenanceTask {
                table: ag.table.clone(),
                start_row: ag.start_row.clone(),
                access_group: Some(ag.name.clone()),
                kind: TaskKind::CellStoreIndexPurge,
                level,
                priority: next_priority(),
            });
            memory.decrement_needed(ag.memory_footprint / 4);
        }

        // Cell-cache compaction: ordered by descending memory used.
        let mut cache: Vec<&AccessGroupSnapshot> = access_groups.iter().collect();
        cache.sort_by_key(|ag| std::cmp::Reverse(ag.memory_used));
        for ag in cache {
            if !memory.need_more() {
                break;
            }
            let level = *range_level.get(&(ag.table.as_str(), ag.start_row.as_str())).unwrap_or(&QueueLevel::User);
            tasks.push(MaintenanceTask {
                table: ag.table.clone(),
                start_row: ag.start_row.clone(),
                access_group: Some(ag.name.clone()),
                kind: TaskKind::CellCacheCompaction,
                level,
                priority: next_priority(),
            });
            memory.decrement_needed(ag.memory_used);
        }

        (tasks, memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ag(name: &str, hits: u64, retention: i64, used: i64) -> AccessGroupSnapshot {
        AccessGroupSnapshot {
            table: "T".into(),
            start_row: "a".into(),
            name: name.into(),
            earliest_cached_revision: 0,
            update_mb_s: 0.0,
            gc_needed: false,
            in_memory: false,
            memory_footprint: used,
            memory_ceiling: i64::MAX,
            merge_run_length: 0,
            merge_run_threshold: 10,
            shadow_cache_hits: hits,
            estimated_retention: retention,
            last_access_ms: 0,
            memory_used: used,
        }
    }

    #[test]
    fn purge_passes_stop_once_budget_met() {
        let cfg = PrioritizerConfig { prune_threshold_min: 10, prune_threshold_max: 1000, merges_per_interval: 1, oversized_cache_ceiling: 0 };
        let groups = vec![ag("ag1", 0, 100, 0), ag("ag2", 5, 100, 0)];
        let memory = MemoryState::new(0, 150);
        let (tasks, memory) = LowMemoryPrioritizer.prioritize(&[], &groups, memory, &cfg);
        assert!(!memory.need_more());
        assert!(tasks.iter().any(|t| t.kind == TaskKind::ShadowCachePurge));
    }

    #[test]
    fn no_purge_when_no_memory_needed() {
        let cfg = PrioritizerConfig { prune_threshold_min: 10, prune_threshold_max: 1000, merges_per_interval: 1, oversized_cache_ceiling: 0 };
        let groups = vec![ag("ag1", 0, 100, 0)];
        let (tasks, _) = LowMemoryPrioritizer.prioritize(&[], &groups, MemoryState::default(), &cfg);
        assert!(tasks.is_empty());
    }
}
