// src/core/name_service.rs

//! The distributed lock service ("name service") is named in the scope as
//! an external collaborator: only its interface is modeled here, not its
//! implementation. The operation processor, register-server flow, and
//! connection manager's recovery trigger all depend on this trait rather
//! than on a concrete client.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    /// A server's lock file was released — the sole trigger for failure
    /// detection (spec §4.3).
    Released { handle: String },
}

/// Capacity of the lock-event broadcast channel. A lagging subscriber
/// drops the oldest events rather than blocking the name service.
const LOCK_EVENT_CHANNEL_CAPACITY: usize = 256;

/// A session with the name service: a handle that must be periodically
/// renewed, whose loss implies every lock it held is now releasable by
/// other sessions.
#[async_trait]
pub trait NameServiceSession: Send + Sync {
    async fn keepalive(&self) -> Result<(), NameServiceError>;
    fn session_id(&self) -> u64;
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum NameServiceError {
    #[error("name service attribute '{0}' not found")]
    AttributeNotFound(String),
    #[error("name service handle '{0}' not found")]
    HandleNotFound(String),
    #[error("name service session expired")]
    SessionExpired,
    #[error("name service unreachable: {0}")]
    Unreachable(String),
}

/// The subset of name-service operations the coordination core actually
/// calls: attribute get/set/increment for the proxy-name and operation-id
/// counters, named handle creation for locks, and a lock-release
/// notification stream.
#[async_trait]
pub trait NameService: Send + Sync {
    async fn get_attribute(&self, path: &str, name: &str) -> Result<Vec<u8>, NameServiceError>;
    async fn set_attribute(&self, path: &str, name: &str, value: &[u8]) -> Result<(), NameServiceError>;

    /// Atomically increments an integer attribute (the monotonic-id
    /// primitive operation ids and minted proxy names are drawn from) and
    /// returns the new value.
    async fn increment_attribute(&self, path: &str, name: &str) -> Result<i64, NameServiceError>;

    async fn create_handle(&self, path: &str) -> Result<String, NameServiceError>;
    async fn release_handle(&self, handle: &str) -> Result<(), NameServiceError>;

    /// Idempotent delete: missing attribute is not an error here, matching
    /// the environmental-error taxonomy's carve-out for idempotent
    /// deletes.
    async fn delete_attribute_idempotent(&self, path: &str, name: &str) -> Result<(), NameServiceError>;

    /// Subscribes to the stream of lock-release events — the sole trigger
    /// for failure detection (spec §4.3). A fresh subscriber only sees
    /// events emitted after it subscribes.
    fn subscribe_lock_events(&self) -> broadcast::Receiver<LockEvent>;
}

/// In-process stand-in used by tests and by the demo binary when no real
/// name-service client is configured. Not a substitute for the real
/// collaborator in production — just enough to exercise the callers.
pub struct InMemoryNameService {
    attrs: dashmap::DashMap<(String, String), Vec<u8>>,
    counters: dashmap::DashMap<(String, String), i64>,
    handles: dashmap::DashMap<String, ()>,
    next_handle: std::sync::atomic::AtomicU64,
    lock_events: broadcast::Sender<LockEvent>,
}

impl Default for InMemoryNameService {
    fn default() -> Self {
        let (lock_events, _) = broadcast::channel(LOCK_EVENT_CHANNEL_CAPACITY);
        InMemoryNameService {
            attrs: dashmap::DashMap::new(),
            counters: dashmap::DashMap::new(),
            handles: dashmap::DashMap::new(),
            next_handle: std::sync::atomic::AtomicU64::new(0),
            lock_events,
        }
    }
}

impl InMemoryNameService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/demo hook standing in for the real name service's own
    /// lock-expiry detection: emits a release event for `handle` as if its
    /// session had just lapsed.
    pub fn simulate_lock_release(&self, handle: &str) {
        let _ = self.lock_events.send(LockEvent::Released { handle: handle.to_string() });
    }
}

#[async_trait]
impl NameService for InMemoryNameService {
    async fn get_attribute(&self, path: &str, name: &str) -> Result<Vec<u8>, NameServiceError> {
        self.attrs
            .get(&(path.to_string(), name.to_string()))
            .map(|v| v.clone())
            .ok_or_else(|| NameServiceError::AttributeNotFound(format!("{path}/{name}")))
    }

    async fn set_attribute(&self, path: &str, name: &str, value: &[u8]) -> Result<(), NameServiceError> {
        self.attrs.insert((path.to_string(), name.to_string()), value.to_vec());
        Ok(())
    }

    async fn increment_attribute(&self, path: &str, name: &str) -> Result<i64, NameServiceError> {
        let mut entry = self.counters.entry((path.to_string(), name.to_string())).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn create_handle(&self, path: &str) -> Result<String, NameServiceError> {
        let n = self.next_handle.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let handle = format!("{path}#{n}");
        self.handles.insert(handle.clone(), ());
        Ok(handle)
    }

    async fn release_handle(&self, handle: &str) -> Result<(), NameServiceError> {
        self.handles
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| NameServiceError::HandleNotFound(handle.to_string()))
    }

    async fn delete_attribute_idempotent(&self, path: &str, name: &str) -> Result<(), NameServiceError> {
        self.attrs.remove(&(path.to_string(), name.to_string()));
        Ok(())
    }

    fn subscribe_lock_events(&self) -> broadcast::Receiver<LockEvent> {
        self.lock_events.subscribe()
    }
}

/// How long a caller should wait for a round trip before treating the name
/// service as unreachable; used when computing clock-skew's
/// `comm_fetch_duration` term.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increment_attribute_is_monotonic_per_key() {
        let ns = InMemoryNameService::new();
        assert_eq!(ns.increment_attribute("/master", "next_op_id").await.unwrap(), 1);
        assert_eq!(ns.increment_attribute("/master", "next_op_id").await.unwrap(), 2);
        assert_eq!(ns.increment_attribute("/master", "next_proxy_id").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_attribute_idempotent_never_errors() {
        let ns = InMemoryNameService::new();
        ns.delete_attribute_idempotent("/x", "y").await.unwrap();
    }

    #[tokio::test]
    async fn lock_release_reaches_a_subscriber() {
        let ns = InMemoryNameService::new();
        let mut events = ns.subscribe_lock_events();
        ns.simulate_lock_release("rs1");
        assert_eq!(events.recv().await.unwrap(), LockEvent::Released { handle: "rs1".into() });
    }
}
