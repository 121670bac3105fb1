// src/core/response_manager.rs

//! Decouples the two phases of every externally visible operation: reply
//! with an id at submission time, and deliver the final result when the
//! client calls FETCH_RESULT. Either phase may arrive first.

use crate::core::metrics::RESPONSE_RECORDS_PENDING;
use crate::core::operation::types::OperationResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, oneshot};

struct ExpirableResult {
    result: OperationResult,
    error: Option<(u32, String)>,
    expires_at: Instant,
    ephemeral: bool,
}

struct DeliveryRecord {
    reply: oneshot::Sender<(OperationResult, Option<(u32, String)>)>,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    expirable: HashMap<u64, ExpirableResult>,
    delivery: HashMap<u64, DeliveryRecord>,
}

/// Rendezvous point between operation completion and `FETCH_RESULT`
/// requests, plus the expiration sweep that garbage-collects both sides.
pub struct ResponseManager {
    inner: Mutex<Inner>,
    wake: Notify,
}

impl Default for ResponseManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseManager {
    pub fn new() -> Self {
        ResponseManager {
            inner: Mutex::new(Inner::default()),
            wake: Notify::new(),
        }
    }

    /// Called when an operation completes. If a delivery record for
    /// `op_id` is already waiting, the result is sent immediately;
    /// otherwise the result is queued until a fetch arrives.
    pub fn add_operation(
        &self,
        op_id: u64,
        result: OperationResult,
        error: Option<(u32, String)>,
        expires_at: Instant,
        ephemeral: bool,
    ) {
        let mut inner = self.inner.lock();
        if let Some(delivery) = inner.delivery.remove(&op_id) {
            let _ = delivery.reply.send((result, error));
        } else {
            inner.expirable.insert(
                op_id,
                ExpirableResult {
                    result,
                    error,
                    expires_at,
                    ephemeral,
                },
            );
        }
        RESPONSE_RECORDS_PENDING.set((inner.expirable.len() + inner.delivery.len()) as f64);
        self.wake.notify_one();
    }

    /// Called for a `FETCH_RESULT` request. If the result already arrived,
    /// it's returned immediately; otherwise a receiver is returned that
    /// resolves once `add_operation` delivers it, or `None` if the record
    /// expires first.
    pub fn add_delivery_info(
        &self,
        op_id: u64,
        expires_at: Instant,
    ) -> Result<(OperationResult, Option<(u32, String)>), oneshot::Receiver<(OperationResult, Option<(u32, String)>)>>
    {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.expirable.remove(&op_id) {
            return Ok((existing.result, existing.error));
        }
        let (tx, rx) = oneshot::channel();
        inner.delivery.insert(op_id, DeliveryRecord { reply: tx, expires_at });
        RESPONSE_RECORDS_PENDING.set((inner.expirable.len() + inner.delivery.len()) as f64);
        self.wake.notify_one();
        Err(rx)
    }

    /// Returns the ids of every non-ephemeral expirable result past its
    /// deadline, removing them from the expirable table (for the caller to
    /// write a metalog removal batch) and dropping stale delivery records.
    pub fn sweep_expired(&self, now: Instant) -> Vec<u64> {
        let mut inner = self.inner.lock();
        let stale_expirable: Vec<u64> = inner
            .expirable
            .iter()
            .filter(|(_, r)| r.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        let mut to_record = Vec::new();
        for id in &stale_expirable {
            if let Some(r) = inner.expirable.remove(id) {
                if !r.ephemeral {
                    to_record.push(*id);
                }
            }
        }
        inner.delivery.retain(|_, d| d.expires_at > now);
        RESPONSE_RECORDS_PENDING.set((inner.expirable.len() + inner.delivery.len()) as f64);
        to_record
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let inner = self.inner.lock();
        inner
            .expirable
            .values()
            .map(|r| r.expires_at)
            .chain(inner.delivery.values().map(|d| d.expires_at))
            .min()
    }

    /// Background task: sleeps until the nearest deadline (or is woken by
    /// a new record), sweeps expired entries, and hands their ids to
    /// `on_expired` for metalog removal recording.
    pub async fn run_expiration_loop(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
        on_expired: impl Fn(Vec<u64>),
    ) {
        loop {
            let sleep_for = match self.next_deadline() {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::from_secs(3600),
            };
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    let expired = self.sweep_expired(Instant::now());
                    if !expired.is_empty() {
                        on_expired(expired);
                    }
                }
                _ = self.wake.notified() => {}
                _ = shutdown.recv() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_arriving_first_is_queued_for_later_fetch() {
        let rm = ResponseManager::new();
        rm.add_operation(1, OperationResult::OperationId(1), None, Instant::now() + Duration::from_secs(60), false);
        let result = rm.add_delivery_info(1, Instant::now() + Duration::from_secs(60));
        assert!(matches!(result, Ok((OperationResult::OperationId(1), None))));
    }

    #[test]
    fn fetch_arriving_first_waits_for_result() {
        let rm = ResponseManager::new();
        let rx = rm.add_delivery_info(2, Instant::now() + Duration::from_secs(60));
        assert!(rx.is_err());
        rm.add_operation(2, OperationResult::OperationId(2), None, Instant::now() + Duration::from_secs(60), false);
        // The delivery record should have been drained by add_operation.
        let inner = rm.inner.lock();
        assert!(!inner.delivery.contains_key(&2));
    }

    #[test]
    fn sweep_expired_only_surfaces_non_ephemeral() {
        let rm = ResponseManager::new();
        let past = Instant::now() - Duration::from_secs(1);
        rm.add_operation(3, OperationResult::None, None, past, false);
        rm.add_operation(4, OperationResult::None, None, past, true);
        let expired = rm.sweep_expired(Instant::now());
        assert_eq!(expired, vec![3]);
    }
}
