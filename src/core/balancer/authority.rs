// src/core/balancer/authority.rs

use super::{BalancePlan, MoveSpec};
use crate::core::metrics::{BALANCE_MOVES_PENDING, BALANCE_PLAN_GENERATION};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MoveKey {
    table: String,
    start_row: String,
}

struct PendingMove {
    spec: MoveSpec,
    done: bool,
    error: Option<String>,
}

/// Tracks the currently active balance plan: registered plans stay active
/// until all their moves are acknowledged. Answers range servers' move
/// queries and records completions.
pub struct BalancePlanAuthority {
    inner: Mutex<Option<HashMap<MoveKey, PendingMove>>>,
    generation: Mutex<u64>,
    /// Next generation number to hand out. Kept separate from `generation`
    /// so allocating one (before a plan is computed) never makes
    /// `current_generation`/`get_destination` briefly disagree with the
    /// plan still active in `inner`.
    next_generation: Mutex<u64>,
    notify: Notify,
}

impl Default for BalancePlanAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl BalancePlanAuthority {
    pub fn new() -> Self {
        BalancePlanAuthority {
            inner: Mutex::new(None),
            generation: Mutex::new(0),
            next_generation: Mutex::new(0),
            notify: Notify::new(),
        }
    }

    pub fn current_generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Allocates the generation number for the next plan a balancer
    /// computes. Monotonically increasing across every `Balance` operation,
    /// regardless of which algorithm ran it, so a server holding a stale
    /// generation from an earlier plan can never mistake it for current.
    pub fn next_generation(&self) -> u64 {
        let mut next = self.next_generation.lock();
        *next += 1;
        *next
    }

    pub fn register_plan(&self, plan: BalancePlan) {
        *self.generation.lock() = plan.generation;
        let mut moves = HashMap::new();
        for m in plan.moves {
            moves.insert(
                MoveKey { table: m.table.clone(), start_row: m.start_row.clone() },
                PendingMove { spec: m, done: false, error: None },
            );
        }
        BALANCE_PLAN_GENERATION.set(plan.generation as f64);
        BALANCE_MOVES_PENDING.set(moves.values().filter(|m| !m.done).count() as f64);
        *self.inner.lock() = Some(moves);
    }

    /// Answers a range server's move query for a table/range, if the
    /// current plan names one and the server's generation matches.
    pub fn get_destination(&self, generation: u64, table: &str, start_row: &str) -> Option<String> {
        if generation != self.current_generation() {
            return None;
        }
        let inner = self.inner.lock();
        let moves = inner.as_ref()?;
        moves
            .get(&MoveKey { table: table.to_string(), start_row: start_row.to_string() })
            .map(|m| m.spec.destination.clone())
    }

    /// Marks a move complete (or failed). Stale generations are ignored.
    pub fn move_complete(&self, generation: u64, table: &str, start_row: &str, error: Option<String>) {
        if generation != self.current_generation() {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(moves) = inner.as_mut() {
            if let Some(entry) = moves.get_mut(&MoveKey { table: table.to_string(), start_row: start_row.to_string() }) {
                entry.done = true;
                entry.error = error;
            }
            BALANCE_MOVES_PENDING.set(moves.values().filter(|m| !m.done).count() as f64);
        }
        self.notify.notify_waiters();
    }

    pub fn is_plan_complete(&self) -> bool {
        match self.inner.lock().as_ref() {
            Some(moves) => moves.values().all(|m| m.done),
            None => true,
        }
    }

    /// Blocks until the named move has been acknowledged or `timeout`
    /// elapses, returning `true` on acknowledgement.
    pub async fn wait_for_complete(&self, generation: u64, table: &str, start_row: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let inner = self.inner.lock();
                if let Some(moves) = inner.as_ref() {
                    if let Some(entry) = moves.get(&MoveKey { table: table.to_string(), start_row: start_row.to_string() }) {
                        if entry.done || generation != self.current_generation() {
                            return entry.done;
                        }
                    } else {
                        return false;
                    }
                } else {
                    return false;
                }
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(remaining) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::balancer::MoveSpec;

    fn plan() -> BalancePlan {
        BalancePlan {
            generation: 3,
            moves: vec![MoveSpec {
                table: "T".into(),
                start_row: "a".into(),
                end_row: "b".into(),
                source: "rs1".into(),
                destination: "rs2".into(),
            }],
        }
    }

    #[test]
    fn get_destination_ignores_stale_generation() {
        let authority = BalancePlanAuthority::new();
        authority.register_plan(plan());
        assert_eq!(authority.get_destination(3, "T", "a"), Some("rs2".into()));
        assert_eq!(authority.get_destination(2, "T", "a"), None);
    }

    #[test]
    fn move_complete_marks_plan_done() {
        let authority = BalancePlanAuthority::new();
        authority.register_plan(plan());
        assert!(!authority.is_plan_complete());
        authority.move_complete(3, "T", "a", None);
        assert!(authority.is_plan_complete());
    }
}
