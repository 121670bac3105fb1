// src/core/maintenance/prioritizer.rs

//! Shared priority-assignment passes, run in a fixed order over the range
//! and access-group snapshot every scheduler cycle. The two concrete
//! prioritizers ([`super::log_cleanup::LogCleanupPrioritizer`] and
//! [`super::low_memory::LowMemoryPrioritizer`]) differ only in whether the
//! memory-purge pass runs.

use super::memory_state::MemoryState;
use std::collections::HashMap;

/// Persisted recovery state of a range still resuming from a prior
/// in-progress split or relinquish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRecoveryState {
    Normal,
    RelinquishLogInstalled,
    SplitLogInstalled,
    SplitShrunk,
}

/// Dispatch level a range's tasks are enqueued at: 0 preempts everything,
/// 3 is starved last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueLevel {
    Root = 0,
    Metadata = 1,
    System = 2,
    User = 3,
}

#[derive(Debug, Clone)]
pub struct RangeSnapshot {
    pub table: String,
    pub start_row: String,
    pub level: QueueLevel,
    pub loading: bool,
    pub recovery_state: RangeRecoveryState,
    pub relinquish: bool,
    pub needs_split: bool,
    pub row_overflow_error: bool,
    pub estimated_memory_freed: i64,
}

#[derive(Debug, Clone)]
pub struct AccessGroupSnapshot {
    pub table: String,
    pub start_row: String,
    pub name: String,
    pub earliest_cached_revision: u64,
    pub update_mb_s: f64,
    pub gc_needed: bool,
    pub in_memory: bool,
    pub memory_footprint: i64,
    pub memory_ceiling: i64,
    pub merge_run_length: u32,
    pub merge_run_threshold: u32,
    pub shadow_cache_hits: u64,
    pub estimated_retention: i64,
    pub last_access_ms: i64,
    pub memory_used: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Initialize,
    ResumeRelinquish,
    ResumeSplit,
    Relinquish,
    Split,
    LogCleanupCompaction,
    GarbageCollectCompaction,
    OversizedCacheCompaction,
    MergingCompaction,
    ShadowCachePurge,
    CellStoreIndexPurge,
    CellCacheCompaction,
}

#[derive(Debug, Clone)]
pub struct MaintenanceTask {
    pub table: String,
    pub start_row: String,
    pub access_group: Option<String>,
    pub kind: TaskKind,
    pub level: QueueLevel,
    pub priority: u64,
}

pub struct PrioritizerConfig {
    pub prune_threshold_min: u64,
    pub prune_threshold_max: u64,
    pub merges_per_interval: u32,
    pub oversized_cache_ceiling: i64,
}

/// Runs passes 1 through 4 (initialization, resumption, splits/relinquishes,
/// necessary compactions), common to both concrete prioritizers, and
/// returns the tasks in priority order alongside an updated memory state.
pub fn common_passes(
    ranges: &[RangeSnapshot],
    access_groups: &[AccessGroupSnapshot],
    mut memory: MemoryState,
    config: &PrioritizerConfig,
) -> (Vec<MaintenanceTask>, MemoryState) {
    let mut tasks = Vec::new();
    let mut priority = 0u64;
    let mut next_priority = || {
        let p = priority;
        priority += 1;
        p
    };

    // Pass 1: initialization tasks, highest band.
    for r in ranges.iter().filter(|r| r.loading) {
        tasks.push(MaintenanceTask {
            table: r.table.clone(),
            start_row: r.start_row.clone(),
            access_group: None,
            kind: TaskKind::Initialize,
            level: r.level,
            priority: next_priority(),
        });
    }

    // Pass 2: resume in-progress split/relinquish, subtracting freed
    // memory from the needed budget.
    for r in ranges.iter().filter(|r| {
        matches!(
            r.recovery_state,
            RangeRecoveryState::RelinquishLogInstalled | RangeRecoveryState::SplitLogInstalled | RangeRecoveryState::SplitShrunk
        )
    }) {
        let kind = if r.recovery_state == RangeRecoveryState::RelinquishLogInstalled {
            TaskKind::ResumeRelinquish
        } else {
            TaskKind::ResumeSplit
        };
        tasks.push(MaintenanceTask {
            table: r.table.clone(),
            start_row: r.start_row.clone(),
            access_group: None,
            kind,
            level: r.level,
            priority: next_priority(),
        });
        memory.decrement_needed(r.estimated_memory_freed);
    }

    // Pass 3: splits and relinquishes (root exempt from split).
    for r in ranges {
        if r.row_overflow_error {
            continue;
        }
        if r.relinquish {
            tasks.push(MaintenanceTask {
                table: r.table.clone(),
                start_row: r.start_row.clone(),
                access_group: None,
                kind: TaskKind::Relinquish,
                level: r.level,
                priority: next_priority(),
            });
        }
        if r.needs_split && r.level != QueueLevel::Root {
            tasks.push(MaintenanceTask {
                table: r.table.clone(),
                start_row: r.start_row.clone(),
                access_group: None,
                kind: TaskKind::Split,
                level: r.level,
                priority: next_priority(),
            });
        }
    }

    // Pass 4: necessary compactions.
    let mut merges_scheduled = 0u32;
    let range_level: HashMap<(&str, &str), QueueLevel> = ranges
        .iter()
        .map(|r| ((r.table.as_str(), r.start_row.as_str()), r.level))
        .collect();

    for ag in access_groups {
        let level = *range_level
            .get(&(ag.table.as_str(), ag.start_row.as_str()))
            .unwrap_or(&QueueLevel::User);

        let threshold = log_cleanup_threshold(ag.update_mb_s, config.prune_threshold_min, config.prune_threshold_max);
        if ag.earliest_cached_revision > 0 && cumulative_unflushed_estimate(ag) >= threshold {
            tasks.push(compaction_task(ag, level, TaskKind::LogCleanupCompaction, &mut next_priority));
        }
        if ag.gc_needed {
            tasks.push(compaction_task(ag, level, TaskKind::GarbageCollectCompaction, &mut next_priority));
        }
        if !ag.in_memory && ag.memory_footprint > ag.memory_ceiling {
            tasks.push(compaction_task(ag, level, TaskKind::OversizedCacheCompaction, &mut next_priority));
        }
        if ag.merge_run_length >= ag.merge_run_threshold && merges_scheduled < config.merges_per_interval {
            tasks.push(compaction_task(ag, level, TaskKind::MergingCompaction, &mut next_priority));
            merges_scheduled += 1;
        }
    }

    (tasks, memory)
}

fn compaction_task(
    ag: &AccessGroupSnapshot,
    level: QueueLevel,
    kind: TaskKind,
    next_priority: &mut impl FnMut() -> u64,
) -> MaintenanceTask {
    MaintenanceTask {
        table: ag.table.clone(),
        start_row: ag.start_row.clone(),
        access_group: Some(ag.name.clone()),
        kind,
        level,
        priority: next_priority(),
    }
}

/// Scales the prune threshold linearly with observed update throughput,
/// clamped to `[min, max]`.
fn log_cleanup_threshold(update_mb_s: f64, min: u64, max: u64) -> u64 {
    let scaled = (update_mb_s * 16.0) as u64;
    scaled.clamp(min, max)
}

fn cumulative_unflushed_estimate(ag: &AccessGroupSnapshot) -> u64 {
    ag.earliest_cached_revision
}

pub trait Prioritizer {
    /// Full priority pass for one cycle: common passes plus whatever
    /// memory-purge behavior distinguishes this prioritizer.
    fn prioritize(
        &self,
        ranges: &[RangeSnapshot],
        access_groups: &[AccessGroupSnapshot],
        memory: MemoryState,
        config: &PrioritizerConfig,
    ) -> (Vec<MaintenanceTask>, MemoryState);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PrioritizerConfig {
        PrioritizerConfig { prune_threshold_min: 10, prune_threshold_max: 1000, merges_per_interval: 2, oversized_cache_ceiling: 0 }
    }

    #[test]
    fn initialization_tasks_come_before_everything_else() {
        let ranges = vec![
            RangeSnapshot {
                table: "T".into(), start_row: "a".into(), level: QueueLevel::User, loading: false,
                recovery_state: RangeRecoveryState::Normal, relinquish: true, needs_split: false,
                row_overflow_error: false, estimated_memory_freed: 0,
            },
            RangeSnapshot {
                table: "T".into(), start_row: "b".into(), level: QueueLevel::User, loading: true,
                recovery_state: RangeRecoveryState::Normal, relinquish: false, needs_split: false,
                row_overflow_error: false, estimated_memory_freed: 0,
            },
        ];
        let (tasks, _) = common_passes(&ranges, &[], MemoryState::default(), &cfg());
        assert_eq!(tasks[0].kind, TaskKind::Initialize);
    }

    #[test]
    fn row_overflow_errored_ranges_skip_split_and_relinquish() {
        let ranges = vec![RangeSnapshot {
            table: "T".into(), start_row: "a".into(), level: QueueLevel::User, loading: false,
            recovery_state: RangeRecoveryState::Normal, relinquish: true, needs_split: true,
            row_overflow_error: true, estimated_memory_freed: 0,
        }];
        let (tasks, _) = common_passes(&ranges, &[], MemoryState::default(), &cfg());
        assert!(tasks.is_empty());
    }

    #[test]
    fn root_range_never_splits() {
        let ranges = vec![RangeSnapshot {
            table: "METADATA".into(), start_row: "".into(), level: QueueLevel::Root, loading: false,
            recovery_state: RangeRecoveryState::Normal, relinquish: false, needs_split: true,
            row_overflow_error: false, estimated_memory_freed: 0,
        }];
        let (tasks, _) = common_passes(&ranges, &[], MemoryState::default(), &cfg());
        assert!(tasks.is_empty());
    }
}
