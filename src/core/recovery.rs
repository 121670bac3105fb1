// src/core/recovery.rs

//! Recovery-step futures: the one exception to the coroutine-free design —
//! condition-variable-signalled structs keyed by operation id, covering
//! the three-phase recovery (replay-fragments -> phantom-prepare ->
//! phantom-commit).

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Success,
    Failure { code: u32, message: String },
}

struct StepState {
    plan_generation: u64,
    expected: HashSet<String>,
    reported: std::collections::HashMap<String, ReportOutcome>,
}

/// One phase of a recovery operation's future, keyed by the Recover
/// operation's id.
pub struct RecoveryStepFuture {
    state: parking_lot::Mutex<StepState>,
    notify: Notify,
}

impl RecoveryStepFuture {
    pub fn new(plan_generation: u64, expected: HashSet<String>) -> Arc<Self> {
        Arc::new(RecoveryStepFuture {
            state: parking_lot::Mutex::new(StepState {
                plan_generation,
                expected,
                reported: std::collections::HashMap::new(),
            }),
            notify: Notify::new(),
        })
    }

    /// Records a success report. Reports from a stale plan generation are
    /// silently dropped.
    pub fn success(&self, proxy: &str, generation: u64) {
        self.report(proxy, generation, ReportOutcome::Success);
    }

    pub fn failure(&self, proxy: &str, generation: u64, code: u32, message: impl Into<String>) {
        self.report(proxy, generation, ReportOutcome::Failure { code, message: message.into() });
    }

    fn report(&self, proxy: &str, generation: u64, outcome: ReportOutcome) {
        let mut state = self.state.lock();
        if generation != state.plan_generation {
            return;
        }
        if !state.expected.contains(proxy) {
            return;
        }
        state.reported.insert(proxy.to_string(), outcome);
        let complete = state.reported.len() == state.expected.len();
        drop(state);
        if complete {
            self.notify.notify_waiters();
        }
    }

    pub fn is_complete(&self) -> bool {
        let state = self.state.lock();
        state.reported.len() == state.expected.len()
    }

    /// Blocks until every expected proxy has reported at the correct
    /// generation.
    pub async fn wait(&self) {
        loop {
            if self.is_complete() {
                return;
            }
            self.notify.notified().await;
        }
    }

    /// Returns the set of proxies that failed, if the future is complete.
    pub fn failures(&self) -> Vec<(String, u32, String)> {
        let state = self.state.lock();
        state
            .reported
            .iter()
            .filter_map(|(proxy, outcome)| match outcome {
                ReportOutcome::Failure { code, message } => {
                    Some((proxy.clone(), *code, message.clone()))
                }
                ReportOutcome::Success => None,
            })
            .collect()
    }

    pub fn expected_count(&self) -> usize {
        self.state.lock().expected.len()
    }

    pub fn reported_count(&self) -> usize {
        self.state.lock().reported.len()
    }
}

/// The three named phases of a single Recover operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryPhase {
    ReplayFragments,
    PhantomPrepare,
    PhantomCommit,
}

/// Registry of live recovery-step futures, keyed by (operation id, phase).
#[derive(Default)]
pub struct RecoveryRegistry {
    futures: DashMap<(u64, RecoveryPhase), Arc<RecoveryStepFuture>>,
}

impl RecoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        op_id: u64,
        phase: RecoveryPhase,
        plan_generation: u64,
        expected: HashSet<String>,
    ) -> Arc<RecoveryStepFuture> {
        let future = RecoveryStepFuture::new(plan_generation, expected);
        self.futures.insert((op_id, phase), future.clone());
        future
    }

    pub fn get(&self, op_id: u64, phase: RecoveryPhase) -> Option<Arc<RecoveryStepFuture>> {
        self.futures.get(&(op_id, phase)).map(|f| f.clone())
    }

    pub fn remove(&self, op_id: u64, phase: RecoveryPhase) {
        self.futures.remove(&(op_id, phase));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_only_once_every_expected_proxy_has_reported() {
        let expected: HashSet<String> = ["rs1", "rs2"].iter().map(|s| s.to_string()).collect();
        let fut = RecoveryStepFuture::new(1, expected);
        assert!(!fut.is_complete());
        fut.success("rs1", 1);
        assert!(!fut.is_complete());
        fut.failure("rs2", 1, 42, "boom");
        assert!(fut.is_complete());
        assert_eq!(fut.failures(), vec![("rs2".to_string(), 42, "boom".to_string())]);
    }

    #[test]
    fn stale_generation_reports_are_dropped() {
        let expected: HashSet<String> = ["rs1"].iter().map(|s| s.to_string()).collect();
        let fut = RecoveryStepFuture::new(2, expected);
        fut.success("rs1", 1);
        assert!(!fut.is_complete());
        fut.success("rs1", 2);
        assert!(fut.is_complete());
    }
}
