// src/core/maintenance/queue.rs

//! The four-level maintenance dispatch queue: within a level, items run in
//! ascending priority order; across levels, lower-numbered levels preempt
//! higher ones. A retried item is re-enqueued after a per-item delay
//! rather than immediately, so a persistently failing task doesn't spin.

use super::prioritizer::{MaintenanceTask, QueueLevel};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct QueueItem {
    task: MaintenanceTask,
    ready_at: Instant,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority
    }
}
impl Eq for QueueItem {}
impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; priority is "ascending wins" so we
        // reverse the comparison to pop the smallest priority first.
        other.task.priority.cmp(&self.task.priority)
    }
}

#[derive(Default)]
struct LevelQueue {
    heap: BinaryHeap<QueueItem>,
}

impl LevelQueue {
    fn push(&mut self, task: MaintenanceTask, ready_at: Instant) {
        self.heap.push(QueueItem { task, ready_at });
    }

    fn peek_ready(&self, now: Instant) -> bool {
        self.heap.peek().map(|item| item.ready_at <= now).unwrap_or(false)
    }

    fn pop(&mut self) -> Option<MaintenanceTask> {
        self.heap.pop().map(|item| item.task)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

/// Four independent level queues, dispatched root-first.
#[derive(Default)]
pub struct MaintenanceQueue {
    root: LevelQueue,
    metadata: LevelQueue,
    system: LevelQueue,
    user: LevelQueue,
}

impl MaintenanceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, task: MaintenanceTask) {
        self.enqueue_at(task, Instant::now());
    }

    fn enqueue_at(&mut self, task: MaintenanceTask, ready_at: Instant) {
        let queue = self.queue_for(task.level);
        queue.push(task, ready_at);
    }

    fn queue_for(&mut self, level: QueueLevel) -> &mut LevelQueue {
        match level {
            QueueLevel::Root => &mut self.root,
            QueueLevel::Metadata => &mut self.metadata,
            QueueLevel::System => &mut self.system,
            QueueLevel::User => &mut self.user,
        }
    }

    /// Pops the highest-priority ready task from the lowest-numbered
    /// non-empty level, or `None` if every level is empty or not yet ready.
    pub fn pop_next(&mut self, now: Instant) -> Option<MaintenanceTask> {
        for level in [&mut self.root, &mut self.metadata, &mut self.system, &mut self.user] {
            if level.peek_ready(now) {
                return level.pop();
            }
        }
        None
    }

    /// Re-enqueues a retried task after `delay`.
    pub fn retry_after(&mut self, task: MaintenanceTask, delay: Duration) {
        self.enqueue_at(task, Instant::now() + delay);
    }

    pub fn depth(&self, level: QueueLevel) -> usize {
        match level {
            QueueLevel::Root => self.root.len(),
            QueueLevel::Metadata => self.metadata.len(),
            QueueLevel::System => self.system.len(),
            QueueLevel::User => self.user.len(),
        }
    }

    pub fn total_depth(&self) -> usize {
        self.root.len() + self.metadata.len() + self.system.len() + self.user.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::maintenance::prioritizer::TaskKind;

    fn task(level: QueueLevel, priority: u64) -> MaintenanceTask {
        MaintenanceTask {
            table: "T".into(),
            start_row: "a".into(),
            access_group: None,
            kind: TaskKind::Split,
            level,
            priority,
        }
    }

    #[test]
    fn root_level_preempts_user_level() {
        let mut q = MaintenanceQueue::new();
        q.enqueue(task(QueueLevel::User, 0));
        q.enqueue(task(QueueLevel::Root, 5));
        let next = q.pop_next(Instant::now()).unwrap();
        assert_eq!(next.level, QueueLevel::Root);
    }

    #[test]
    fn within_level_ascending_priority_order() {
        let mut q = MaintenanceQueue::new();
        q.enqueue(task(QueueLevel::User, 10));
        q.enqueue(task(QueueLevel::User, 2));
        let now = Instant::now();
        assert_eq!(q.pop_next(now).unwrap().priority, 2);
        assert_eq!(q.pop_next(now).unwrap().priority, 10);
    }

    #[test]
    fn retried_task_is_not_ready_until_delay_elapses() {
        let mut q = MaintenanceQueue::new();
        q.retry_after(task(QueueLevel::User, 1), Duration::from_secs(60));
        assert!(q.pop_next(Instant::now()).is_none());
        assert_eq!(q.total_depth(), 1);
    }
}
