// src/core/maintenance/scheduler.rs

//! Drives the per-interval maintenance cycle: snapshot ranges and access
//! groups, run the selected prioritizer, fill the dispatch queue, and scan
//! for commit-log fragments now safe to prune.

use super::log_cleanup::LogCleanupPrioritizer;
use super::low_memory::LowMemoryPrioritizer;
use super::memory_state::MemoryState;
use super::prioritizer::{AccessGroupSnapshot, Prioritizer, PrioritizerConfig, RangeSnapshot};
use super::queue::MaintenanceQueue;
use crate::core::metalog::log_class::LogClass;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// A snapshot provider is anything that can hand the scheduler the current
/// range and access-group state; in production this is backed by the
/// range server's own stats lock (the out-of-scope collaborator), kept
/// behind a trait here so the cycle logic is independently testable.
pub trait MaintenanceSnapshot: Send + Sync {
    fn ranges(&self) -> Vec<RangeSnapshot>;
    fn access_groups(&self) -> Vec<AccessGroupSnapshot>;
    fn memory_state(&self) -> MemoryState;
    /// Earliest cached revision per log class, for the commit-log pruning
    /// scan; `None` if no range in that class has anything cached yet.
    fn earliest_revision_by_class(&self) -> HashMap<LogClass, u64>;
    /// Raises the out-of-scope block cache's soft limit by `extra_bytes`.
    /// Called once per cycle that ends with memory slack and a workload
    /// that's nearly read-only, letting the cache absorb room nothing else
    /// needs.
    fn raise_block_cache_soft_limit(&self, extra_bytes: i64);
}

/// A workload with (effectively) no writes and few reads serviced from the
/// shadow cache across every access group — the other half of the slack
/// condition alongside `MemoryState::has_slack`.
fn workload_is_nearly_read_only(groups: &[AccessGroupSnapshot]) -> bool {
    const SCAN_HITS_PER_GROUP_CEILING: u64 = 4;
    if groups.is_empty() {
        return true;
    }
    let no_updates = groups.iter().all(|g| g.update_mb_s <= 0.0);
    let few_scans =
        groups.iter().map(|g| g.shadow_cache_hits).sum::<u64>() <= SCAN_HITS_PER_GROUP_CEILING * groups.len() as u64;
    no_updates && few_scans
}

pub struct MaintenanceScheduler<S: MaintenanceSnapshot> {
    snapshot: S,
    queue: Mutex<MaintenanceQueue>,
    config: PrioritizerConfig,
    low_memory_threshold: i64,
}

impl<S: MaintenanceSnapshot> MaintenanceScheduler<S> {
    pub fn new(snapshot: S, config: PrioritizerConfig, low_memory_threshold: i64) -> Self {
        MaintenanceScheduler {
            snapshot,
            queue: Mutex::new(MaintenanceQueue::new()),
            config,
            low_memory_threshold,
        }
    }

    /// Runs one full cycle: picks LogCleanup or LowMemory by current
    /// memory pressure, computes priorities, and enqueues the resulting
    /// tasks. Returns the number of tasks enqueued.
    pub fn run_cycle(&self) -> usize {
        let ranges = self.snapshot.ranges();
        let access_groups = self.snapshot.access_groups();
        let memory = self.snapshot.memory_state();

        let (tasks, memory) = if memory.balance >= self.low_memory_threshold {
            LowMemoryPrioritizer.prioritize(&ranges, &access_groups, memory, &self.config)
        } else {
            LogCleanupPrioritizer.prioritize(&ranges, &access_groups, memory, &self.config)
        };

        if memory.has_slack() && workload_is_nearly_read_only(&access_groups) {
            let slack = memory.limit - memory.balance;
            self.snapshot.raise_block_cache_soft_limit(slack);
            debug!(slack, "workload nearly read-only with memory slack, raised block cache soft limit");
        }

        let mut tasks = tasks;
        tasks.sort_by_key(|t| t.priority);
        let count = tasks.len();
        let mut queue = self.queue.lock();
        for task in tasks {
            queue.enqueue(task);
        }
        debug!(enqueued = count, needed = memory.needed, "maintenance cycle complete");
        count
    }

    /// Scans the earliest cached revision across all ranges, partitioned
    /// by log class, and returns the minimum revision each class's commit
    /// log may safely prune up to.
    pub fn commit_log_prune_points(&self) -> HashMap<LogClass, u64> {
        self.snapshot.earliest_revision_by_class()
    }

    pub fn pop_next(&self) -> Option<super::prioritizer::MaintenanceTask> {
        self.queue.lock().pop_next(std::time::Instant::now())
    }

    pub fn retry_after(&self, task: super::prioritizer::MaintenanceTask, delay: Duration) {
        self.queue.lock().retry_after(task, delay);
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().total_depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::prioritizer::QueueLevel;

    struct FakeSnapshot {
        ranges: Vec<RangeSnapshot>,
        groups: Vec<AccessGroupSnapshot>,
        memory: MemoryState,
        raised: Mutex<Option<i64>>,
    }

    impl FakeSnapshot {
        fn new(ranges: Vec<RangeSnapshot>, groups: Vec<AccessGroupSnapshot>, memory: MemoryState) -> Self {
            FakeSnapshot { ranges, groups, memory, raised: Mutex::new(None) }
        }
    }

    impl MaintenanceSnapshot for FakeSnapshot {
        fn ranges(&self) -> Vec<RangeSnapshot> {
            self.ranges.clone()
        }
        fn access_groups(&self) -> Vec<AccessGroupSnapshot> {
            self.groups.clone()
        }
        fn memory_state(&self) -> MemoryState {
            self.memory
        }
        fn earliest_revision_by_class(&self) -> HashMap<LogClass, u64> {
            HashMap::new()
        }
        fn raise_block_cache_soft_limit(&self, extra_bytes: i64) {
            *self.raised.lock() = Some(extra_bytes);
        }
    }

    fn cfg() -> PrioritizerConfig {
        PrioritizerConfig { prune_threshold_min: 10, prune_threshold_max: 1000, merges_per_interval: 2, oversized_cache_ceiling: 0 }
    }

    #[test]
    fn cycle_under_memory_pressure_uses_low_memory_prioritizer() {
        let snapshot = FakeSnapshot::new(
            vec![],
            vec![AccessGroupSnapshot {
                table: "T".into(), start_row: "a".into(), name: "ag".into(),
                earliest_cached_revision: 0, update_mb_s: 0.0, gc_needed: false, in_memory: false,
                memory_footprint: 0, memory_ceiling: i64::MAX, merge_run_length: 0, merge_run_threshold: 10,
                shadow_cache_hits: 0, estimated_retention: 1000, last_access_ms: 0, memory_used: 0,
            }],
            MemoryState::new(100, 500),
        );
        let scheduler = MaintenanceScheduler::new(snapshot, cfg(), 400);
        let enqueued = scheduler.run_cycle();
        assert!(enqueued > 0);
    }

    #[test]
    fn root_level_task_dispatched_before_user_level() {
        let snapshot = FakeSnapshot::new(
            vec![
                RangeSnapshot {
                    table: "T".into(), start_row: "a".into(), level: QueueLevel::User, loading: true,
                    recovery_state: super::super::prioritizer::RangeRecoveryState::Normal,
                    relinquish: false, needs_split: false, row_overflow_error: false, estimated_memory_freed: 0,
                },
                RangeSnapshot {
                    table: "METADATA".into(), start_row: "".into(), level: QueueLevel::Root, loading: true,
                    recovery_state: super::super::prioritizer::RangeRecoveryState::Normal,
                    relinquish: false, needs_split: false, row_overflow_error: false, estimated_memory_freed: 0,
                },
            ],
            vec![],
            MemoryState::default(),
        );
        let scheduler = MaintenanceScheduler::new(snapshot, cfg(), 1_000_000);
        scheduler.run_cycle();
        let next = scheduler.pop_next().unwrap();
        assert_eq!(next.level, QueueLevel::Root);
    }

    #[test]
    fn slack_with_read_only_workload_raises_block_cache_soft_limit() {
        let group = AccessGroupSnapshot {
            table: "T".into(), start_row: "a".into(), name: "ag".into(),
            earliest_cached_revision: 0, update_mb_s: 0.0, gc_needed: false, in_memory: false,
            memory_footprint: 0, memory_ceiling: i64::MAX, merge_run_length: 0, merge_run_threshold: 10,
            shadow_cache_hits: 0, estimated_retention: 1000, last_access_ms: 0, memory_used: 0,
        };
        let snapshot = FakeSnapshot::new(vec![], vec![group], MemoryState::new(1000, 200));
        let scheduler = MaintenanceScheduler::new(snapshot, cfg(), 1_000_000);
        scheduler.run_cycle();
        assert_eq!(*scheduler.snapshot.raised.lock(), Some(800));
    }

    #[test]
    fn slack_with_active_writes_does_not_raise_block_cache_soft_limit() {
        let group = AccessGroupSnapshot {
            table: "T".into(), start_row: "a".into(), name: "ag".into(),
            earliest_cached_revision: 0, update_mb_s: 5.0, gc_needed: false, in_memory: false,
            memory_footprint: 0, memory_ceiling: i64::MAX, merge_run_length: 0, merge_run_threshold: 10,
            shadow_cache_hits: 0, estimated_retention: 1000, last_access_ms: 0, memory_used: 0,
        };
        let snapshot = FakeSnapshot::new(vec![], vec![group], MemoryState::new(1000, 200));
        let scheduler = MaintenanceScheduler::new(snapshot, cfg(), 1_000_000);
        scheduler.run_cycle();
        assert_eq!(*scheduler.snapshot.raised.lock(), None);
    }
}
