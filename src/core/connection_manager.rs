// src/core/connection_manager.rs

//! Source of truth for "who is a range server, where do we reach them, are
//! they healthy". A multi-indexed set of connection records keyed by proxy
//! name (unique) with non-unique auxiliary lookups by hostname and public
//! address, the Rust-native analog of the original's boost multi-index
//! container with one unique and three non-unique hashed indices.

use bitflags::bitflags;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ServerFlags: u8 {
        const CONNECTED  = 0b0001;
        const BALANCED   = 0b0010;
        const REMOVED    = 0b0100;
        const RECOVERING = 0b1000;
    }
}

#[derive(Debug, Clone)]
pub struct ServerRecord {
    pub proxy: String,
    pub hostname: String,
    pub local_addr: String,
    pub public_addr: String,
    pub flags: ServerFlags,
    pub disk_fill_pct: f64,
    pub removed_at: Option<Instant>,
}

impl ServerRecord {
    fn new(proxy: impl Into<String>) -> Self {
        ServerRecord {
            proxy: proxy.into(),
            hostname: String::new(),
            local_addr: String::new(),
            public_addr: String::new(),
            flags: ServerFlags::empty(),
            disk_fill_pct: 0.0,
            removed_at: None,
        }
    }
}

/// Configured cutoff above which a server is no longer an eligible
/// destination for new ranges, except under `urgent` assignment.
#[derive(Debug, Clone, Copy)]
pub struct DiskThreshold(pub f64);

/// The connection manager itself: one proxy-name-keyed map plus two
/// auxiliary non-unique lookups, guarded by a single mutex per the
/// concurrency model (`each one mutex covering its container`).
pub struct ConnectionManager {
    inner: Mutex<Inner>,
    /// Round-robin cursor for `next_available_server`, kept outside the
    /// main mutex so reads of it don't contend with record mutation.
    cursor: AtomicUsize,
    live_count: AtomicUsize,
    disk_threshold: DiskThreshold,
}

struct Inner {
    by_proxy: HashMap<String, ServerRecord>,
    by_hostname: HashMap<String, Vec<String>>,
    by_public_addr: HashMap<String, Vec<String>>,
}

impl ConnectionManager {
    pub fn new(disk_threshold: DiskThreshold) -> Self {
        ConnectionManager {
            inner: Mutex::new(Inner {
                by_proxy: HashMap::new(),
                by_hostname: HashMap::new(),
                by_public_addr: HashMap::new(),
            }),
            cursor: AtomicUsize::new(0),
            live_count: AtomicUsize::new(0),
            disk_threshold,
        }
    }

    /// Inserts a new record. A duplicate proxy name indicates a caller bug
    /// (the name-service attribute counter that mints proxy names is the
    /// sole allocator), so this panics rather than returning a recoverable
    /// error, mirroring the original's bug-assert.
    pub fn add_server(&self, proxy: impl Into<String>) {
        let proxy = proxy.into();
        let mut inner = self.inner.lock();
        assert!(
            !inner.by_proxy.contains_key(&proxy),
            "duplicate proxy name '{proxy}' added to connection manager"
        );
        inner.by_proxy.insert(proxy.clone(), ServerRecord::new(proxy));
    }

    /// Inserts a record for `proxy` only if one isn't already present;
    /// used by register-server flow where the proxy may already exist
    /// from a prior registration.
    pub fn add_server_if_absent(&self, proxy: &str) {
        let mut inner = self.inner.lock();
        inner
            .by_proxy
            .entry(proxy.to_string())
            .or_insert_with(|| ServerRecord::new(proxy));
    }

    pub fn disk_threshold_pct(&self) -> f64 {
        self.disk_threshold.0
    }

    /// Proxy names of every currently connected, non-removed server.
    pub fn live_server_names(&self) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .by_proxy
            .values()
            .filter(|r| r.flags.contains(ServerFlags::CONNECTED) && !r.flags.contains(ServerFlags::REMOVED))
            .map(|r| r.proxy.clone())
            .collect()
    }

    pub fn lookup_by_hostname(&self, hostname: &str) -> Option<String> {
        let inner = self.inner.lock();
        inner.by_hostname.get(hostname)?.first().cloned()
    }

    pub fn lookup_by_public_addr(&self, addr: &str) -> Option<String> {
        let inner = self.inner.lock();
        inner.by_public_addr.get(addr)?.first().cloned()
    }

    /// Updates mutable fields for a (re)connecting server. Returns `true`
    /// on a 0→1 connection transition.
    pub fn connect_server(
        &self,
        proxy: &str,
        hostname: &str,
        local_addr: &str,
        public_addr: &str,
    ) -> bool {
        let mut inner = self.inner.lock();
        let was_connected = inner
            .by_proxy
            .get(proxy)
            .map(|r| r.flags.contains(ServerFlags::CONNECTED))
            .unwrap_or(false);

        let changed = {
            let record = inner
                .by_proxy
                .entry(proxy.to_string())
                .or_insert_with(|| ServerRecord::new(proxy));
            let changed = record.hostname != hostname
                || record.local_addr != local_addr
                || record.public_addr != public_addr;
            record.hostname = hostname.to_string();
            record.local_addr = local_addr.to_string();
            record.public_addr = public_addr.to_string();
            record.flags.insert(ServerFlags::CONNECTED);
            record.flags.remove(ServerFlags::REMOVED);
            changed
        };

        if changed {
            reindex_aux(&mut inner.by_hostname, proxy, hostname);
            reindex_aux(&mut inner.by_public_addr, proxy, public_addr);
        }

        if !was_connected {
            self.live_count.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Returns `true` on a 1→0 connection transition.
    pub fn disconnect_server(&self, proxy: &str) -> bool {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.by_proxy.get_mut(proxy) {
            if record.flags.contains(ServerFlags::CONNECTED) {
                record.flags.remove(ServerFlags::CONNECTED);
                self.live_count.fetch_sub(1, Ordering::SeqCst);
                return true;
            }
        }
        false
    }

    pub fn live_count(&self) -> usize {
        self.live_count.load(Ordering::SeqCst)
    }

    pub fn registered_count(&self) -> usize {
        self.inner.lock().by_proxy.len()
    }

    pub fn mark_removed(&self, proxy: &str, now: Instant) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.by_proxy.get_mut(proxy) {
            record.flags.insert(ServerFlags::REMOVED);
            record.flags.remove(ServerFlags::CONNECTED);
            record.removed_at = Some(now);
        }
    }

    pub fn set_recovering(&self, proxy: &str, recovering: bool) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.by_proxy.get_mut(proxy) {
            record.flags.set(ServerFlags::RECOVERING, recovering);
        }
    }

    /// Rotates the round-robin cursor, skipping disconnected, removed, or
    /// recovering entries and entries over the disk-fill threshold. If
    /// `urgent` and no under-threshold server exists, returns the
    /// least-full live server instead of `None`.
    pub fn next_available_server(&self, urgent: bool) -> Option<String> {
        let inner = self.inner.lock();
        let mut candidates: Vec<&ServerRecord> = inner
            .by_proxy
            .values()
            .filter(|r| {
                r.flags.contains(ServerFlags::CONNECTED)
                    && !r.flags.contains(ServerFlags::REMOVED)
                    && !r.flags.contains(ServerFlags::RECOVERING)
            })
            .collect();
        candidates.sort_by(|a, b| a.proxy.cmp(&b.proxy));
        if candidates.is_empty() {
            return None;
        }

        let eligible: Vec<&&ServerRecord> = candidates
            .iter()
            .filter(|r| r.disk_fill_pct < self.disk_threshold.0)
            .collect();

        if !eligible.is_empty() {
            let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % eligible.len();
            return Some(eligible[idx].proxy.clone());
        }

        if urgent {
            let least_full = candidates
                .iter()
                .min_by(|a, b| a.disk_fill_pct.partial_cmp(&b.disk_fill_pct).unwrap())
                .unwrap();
            return Some(least_full.proxy.clone());
        }

        None
    }

    /// Connections whose `BALANCED` flag is clear and whose proxy name is
    /// in `subset`.
    pub fn get_unbalanced_servers(&self, subset: &[String]) -> Vec<String> {
        let inner = self.inner.lock();
        subset
            .iter()
            .filter(|p| {
                inner
                    .by_proxy
                    .get(p.as_str())
                    .map(|r| !r.flags.contains(ServerFlags::BALANCED))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn mark_balanced(&self, proxy: &str, balanced: bool) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.by_proxy.get_mut(proxy) {
            record.flags.set(ServerFlags::BALANCED, balanced);
        }
    }

    /// Applies a batch of `{proxy, disk_usage_pct}` updates atomically.
    pub fn set_range_server_state(&self, updates: &[(String, f64)]) {
        let mut inner = self.inner.lock();
        for (proxy, pct) in updates {
            if let Some(record) = inner.by_proxy.get_mut(proxy) {
                record.disk_fill_pct = *pct;
            }
        }
    }

    pub fn record(&self, proxy: &str) -> Option<ServerRecord> {
        self.inner.lock().by_proxy.get(proxy).cloned()
    }

    pub fn is_connected(&self, proxy: &str) -> bool {
        self.inner
            .lock()
            .by_proxy
            .get(proxy)
            .map(|r| r.flags.contains(ServerFlags::CONNECTED))
            .unwrap_or(false)
    }
}

fn reindex_aux(index: &mut HashMap<String, Vec<String>>, proxy: &str, key: &str) {
    for bucket in index.values_mut() {
        bucket.retain(|p| p != proxy);
    }
    index.entry(key.to_string()).or_default().push(proxy.to_string());
}

/// Grace-period bookkeeping for the server-file release callback: the
/// sole trigger for failure detection (spec §4.3). Kept separate from
/// `ConnectionManager` so the recovery barrier schedule can be inspected
/// independently of live connection state.
pub struct RecoveryBarrier {
    grace_period: Duration,
    pending: DashMap<String, Instant>,
}

impl RecoveryBarrier {
    pub fn new(grace_period: Duration) -> Self {
        RecoveryBarrier {
            grace_period,
            pending: DashMap::new(),
        }
    }

    /// Called when the name service reports a server's lock file released.
    /// Advances the recovery barrier by the configured grace period.
    pub fn advance(&self, proxy: &str, now: Instant) -> Instant {
        let barrier = now + self.grace_period;
        self.pending.insert(proxy.to_string(), barrier);
        barrier
    }

    pub fn barrier_for(&self, proxy: &str) -> Option<Instant> {
        self.pending.get(proxy).map(|r| *r)
    }

    pub fn clear(&self, proxy: &str) {
        self.pending.remove(proxy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold(pct: f64) -> ConnectionManager {
        ConnectionManager::new(DiskThreshold(pct))
    }

    #[test]
    fn connect_then_disconnect_transitions() {
        let cm = threshold(90.0);
        cm.add_server("rs1");
        assert!(cm.connect_server("rs1", "host1", "127.0.0.1:1", "1.2.3.4:1"));
        assert!(!cm.connect_server("rs1", "host1", "127.0.0.1:1", "1.2.3.4:1"));
        assert!(cm.disconnect_server("rs1"));
        assert!(!cm.disconnect_server("rs1"));
    }

    #[test]
    fn next_available_server_returns_least_full_when_urgent_and_all_over_threshold() {
        let cm = threshold(50.0);
        cm.add_server("rs1");
        cm.connect_server("rs1", "h1", "l1", "p1");
        cm.add_server("rs2");
        cm.connect_server("rs2", "h2", "l2", "p2");
        cm.set_range_server_state(&[("rs1".into(), 90.0), ("rs2".into(), 70.0)]);

        assert_eq!(cm.next_available_server(false), None);
        assert_eq!(cm.next_available_server(true), Some("rs2".into()));
    }

    #[test]
    fn aux_lookup_tracks_reconnect_under_new_hostname() {
        let cm = threshold(90.0);
        cm.add_server("rs1");
        cm.connect_server("rs1", "host-a", "l", "p");
        assert_eq!(cm.lookup_by_hostname("host-a"), Some("rs1".into()));
        cm.connect_server("rs1", "host-b", "l", "p");
        assert_eq!(cm.lookup_by_hostname("host-a"), None);
        assert_eq!(cm.lookup_by_hostname("host-b"), Some("rs1".into()));
    }
}
