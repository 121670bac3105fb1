// src/core/reference_manager.rs

//! Tracks non-owning references to in-flight operations. The processor is
//! the sole owner of operation storage (the arena-plus-id scheme from the
//! design notes); anything else that needs to address an operation —
//! a staged sub-operation's parent pointer, a recovery-step future, a
//! client handle — holds a 64-bit id here instead of a pointer, and the
//! reference manager is how the processor knows an id is still reachable
//! from outside the graph before it retires it.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct ReferenceManager {
    refcounts: DashMap<u64, usize>,
}

impl ReferenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, op_id: u64) {
        *self.refcounts.entry(op_id).or_insert(0) += 1;
    }

    /// Releases one reference; returns the remaining count.
    pub fn release(&self, op_id: u64) -> usize {
        let remaining = match self.refcounts.get_mut(&op_id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            self.refcounts.remove(&op_id);
        }
        remaining
    }

    pub fn is_referenced(&self, op_id: u64) -> bool {
        self.refcounts.contains_key(&op_id)
    }

    pub fn reference_count(&self, op_id: u64) -> usize {
        self.refcounts.get(&op_id).map(|c| *c).unwrap_or(0)
    }
}

/// Monotonic 64-bit id source. In production this is backed by the name
/// service's attribute-increment primitive (spec §3); kept as a thin local
/// fallback so tests and the processor's own bookkeeping (sub-operation
/// hashes, for instance) don't need a name-service round trip.
#[derive(Default)]
pub struct LocalIdAllocator {
    next: AtomicUsize,
}

impl LocalIdAllocator {
    pub fn new(start: u64) -> Self {
        LocalIdAllocator {
            next: AtomicUsize::new(start as usize),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcount_drops_to_zero_and_forgets_entry() {
        let rm = ReferenceManager::new();
        rm.acquire(1);
        rm.acquire(1);
        assert_eq!(rm.release(1), 1);
        assert!(rm.is_referenced(1));
        assert_eq!(rm.release(1), 0);
        assert!(!rm.is_referenced(1));
    }

    #[test]
    fn id_allocator_is_monotonic() {
        let alloc = LocalIdAllocator::new(100);
        assert_eq!(alloc.next_id(), 100);
        assert_eq!(alloc.next_id(), 101);
    }
}
