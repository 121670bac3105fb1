// src/core/maintenance/log_cleanup.rs

//! Steady-state prioritizer: runs only the common passes, driving
//! compaction so that old commit-log fragments become prunable. No memory
//! purges — this variant assumes headroom.

use super::memory_state::MemoryState;
use super::prioritizer::{AccessGroupSnapshot, MaintenanceTask, Prioritizer, PrioritizerConfig, RangeSnapshot, common_passes};

pub struct LogCleanupPrioritizer;

impl Prioritizer for LogCleanupPrioritizer {
    fn prioritize(
        &self,
        ranges: &[RangeSnapshot],
        access_groups: &[AccessGroupSnapshot],
        memory: MemoryState,
        config: &PrioritizerConfig,
    ) -> (Vec<MaintenanceTask>, MemoryState) {
        common_passes(ranges, access_groups, memory, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_state_schedules_no_purge_tasks() {
        let cfg = PrioritizerConfig { prune_threshold_min: 10, prune_threshold_max: 1000, merges_per_interval: 1, oversized_cache_ceiling: 0 };
        let (tasks, _) = LogCleanupPrioritizer.prioritize(&[], &[], MemoryState::default(), &cfg);
        assert!(tasks.is_empty());
    }
}
