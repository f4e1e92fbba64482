//! RejectionLedger - process-wide rejected-submission counters, one per pool
//!
//! A single ledger is created by the composition root and handed to every
//! pool. Counters are created on first registration and never reset.
//! Increments go straight to the pool's `AtomicU64`, so overflow bursts in
//! one pool never contend with lookups or increments for another.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use dp_common::PoolKey;

#[derive(Default)]
pub struct RejectionLedger {
    counters: DashMap<PoolKey, Arc<AtomicU64>>,
}

impl RejectionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for `key`, created at zero if this is the first registration.
    ///
    /// Every caller registering the same key gets the same counter.
    pub fn register(&self, key: &PoolKey) -> Arc<AtomicU64> {
        if let Some(counter) = self.counters.get(key) {
            return Arc::clone(counter.value());
        }
        Arc::clone(
            self.counters
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .value(),
        )
    }

    /// Rejections recorded so far; zero for pools never registered.
    pub fn rejected_count(&self, key: &PoolKey) -> u64 {
        self.counters
            .get(key)
            .map(|counter| counter.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Snapshot of every counter, sorted by key.
    pub fn counts(&self) -> Vec<(PoolKey, u64)> {
        let mut counts: Vec<_> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::SeqCst)))
            .collect();
        counts.sort_by(|a, b| a.0.cmp(&b.0));
        counts
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_shares_counter() {
        let ledger = RejectionLedger::new();
        let key = PoolKey::new("app", "p1");

        let a = ledger.register(&key);
        let b = ledger.register(&key);
        a.fetch_add(3, Ordering::SeqCst);

        assert_eq!(b.load(Ordering::SeqCst), 3);
        assert_eq!(ledger.rejected_count(&key), 3);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_same_pool_name_in_different_apps_is_separate() {
        let ledger = RejectionLedger::new();
        let a = ledger.register(&PoolKey::new("app-a", "shared"));
        let b = ledger.register(&PoolKey::new("app-b", "shared"));
        a.fetch_add(2, Ordering::SeqCst);
        b.fetch_add(1, Ordering::SeqCst);

        assert_eq!(ledger.rejected_count(&PoolKey::new("app-a", "shared")), 2);
        assert_eq!(ledger.rejected_count(&PoolKey::new("app-b", "shared")), 1);
    }

    #[test]
    fn test_unknown_pool_reads_zero() {
        let ledger = RejectionLedger::new();
        assert_eq!(ledger.rejected_count(&PoolKey::new("app", "missing")), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let ledger = Arc::new(RejectionLedger::new());
        let key = PoolKey::new("app", "hot");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        ledger.register(&key).fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.rejected_count(&key), 8000);
        assert_eq!(ledger.counts(), vec![(key, 8000)]);
    }
}
