//! Overflow handling with rejection accounting
//!
//! `RejectionTracker` wraps whichever overflow policy a pool runs with. Every
//! overflow event first bumps the pool's ledger counter, then the policy
//! decides what happens to the item.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dp_common::{OverflowPolicyKind, PoolKey};
use tracing::debug;

use crate::controller::Task;
use crate::error::PoolError;
use crate::ledger::RejectionLedger;
use crate::pool_metrics;
use crate::queue::ResizableBoundedQueue;

/// User-supplied overflow behaviour.
pub trait OverflowHandler: Send + Sync {
    /// Name reported as the pool's policy.
    fn name(&self) -> &str;

    /// Take ownership of an item the pool could not accept.
    ///
    /// Returning an error propagates it to the submitter.
    fn on_overflow(&self, pool: &PoolKey, task: Task) -> std::result::Result<(), PoolError>;
}

/// Overflow policy a pool is built with.
#[derive(Clone)]
pub enum OverflowPolicy {
    Abort,
    Discard,
    DiscardOldest,
    CallerRuns,
    Custom(Arc<dyn OverflowHandler>),
}

impl OverflowPolicy {
    pub fn name(&self) -> &str {
        match self {
            OverflowPolicy::Abort => OverflowPolicyKind::Abort.name(),
            OverflowPolicy::Discard => OverflowPolicyKind::Discard.name(),
            OverflowPolicy::DiscardOldest => OverflowPolicyKind::DiscardOldest.name(),
            OverflowPolicy::CallerRuns => OverflowPolicyKind::CallerRuns.name(),
            OverflowPolicy::Custom(handler) => handler.name(),
        }
    }
}

impl From<OverflowPolicyKind> for OverflowPolicy {
    fn from(kind: OverflowPolicyKind) -> Self {
        match kind {
            OverflowPolicyKind::Abort => OverflowPolicy::Abort,
            OverflowPolicyKind::Discard => OverflowPolicy::Discard,
            OverflowPolicyKind::DiscardOldest => OverflowPolicy::DiscardOldest,
            OverflowPolicyKind::CallerRuns => OverflowPolicy::CallerRuns,
        }
    }
}

impl fmt::Debug for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the submitter must do after an overflow event.
pub enum OverflowAction {
    /// Fail the submission.
    Reject(PoolError),
    /// The item is gone (dropped or taken by a custom handler).
    Done,
    /// Room was made by evicting the oldest queued item; submit again.
    Retry(Task),
    /// Run the item on the submitting task.
    RunOnCaller(Task),
}

pub struct RejectionTracker {
    key: PoolKey,
    policy: OverflowPolicy,
    counter: Arc<AtomicU64>,
}

impl RejectionTracker {
    /// Wrap `policy`, registering `key` with the shared ledger.
    pub fn new(key: PoolKey, policy: OverflowPolicy, ledger: &RejectionLedger) -> Self {
        let counter = ledger.register(&key);
        Self { key, policy, counter }
    }

    /// Count one overflow event, then apply the wrapped policy.
    ///
    /// Must be called exactly once per event.
    pub fn record_and_delegate(&self, task: Task, queue: &ResizableBoundedQueue<Task>) -> OverflowAction {
        let total = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        pool_metrics::record_rejected(&self.key);
        debug!(pool = %self.key, policy = self.policy.name(), rejected_total = total, "Pool saturated");

        match &self.policy {
            OverflowPolicy::Abort => OverflowAction::Reject(PoolError::Rejected(self.key.to_string())),
            OverflowPolicy::Discard => OverflowAction::Done,
            OverflowPolicy::DiscardOldest => {
                if queue.try_dequeue().is_some() {
                    debug!(pool = %self.key, "Evicted oldest queued item");
                }
                OverflowAction::Retry(task)
            }
            OverflowPolicy::CallerRuns => OverflowAction::RunOnCaller(task),
            OverflowPolicy::Custom(handler) => match handler.on_overflow(&self.key, task) {
                Ok(()) => OverflowAction::Done,
                Err(e) => OverflowAction::Reject(e),
            },
        }
    }

    pub fn rejected_count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Name of the wrapped policy.
    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    pub fn policy(&self) -> &OverflowPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn noop() -> Task {
        Box::pin(async {})
    }

    struct Parking {
        parked: Mutex<Vec<Task>>,
    }

    impl OverflowHandler for Parking {
        fn name(&self) -> &str {
            "ParkingPolicy"
        }

        fn on_overflow(&self, _pool: &PoolKey, task: Task) -> std::result::Result<(), PoolError> {
            self.parked.lock().push(task);
            Ok(())
        }
    }

    #[test]
    fn test_every_policy_counts_once() {
        let ledger = RejectionLedger::new();
        let queue = ResizableBoundedQueue::new(1).unwrap();
        let policies = vec![
            OverflowPolicy::Abort,
            OverflowPolicy::Discard,
            OverflowPolicy::DiscardOldest,
            OverflowPolicy::CallerRuns,
        ];

        for (i, policy) in policies.into_iter().enumerate() {
            let key = PoolKey::new("app", format!("p{}", i));
            let tracker = RejectionTracker::new(key.clone(), policy, &ledger);
            let _ = tracker.record_and_delegate(noop(), &queue);
            assert_eq!(tracker.rejected_count(), 1);
            assert_eq!(ledger.rejected_count(&key), 1);
        }
    }

    #[test]
    fn test_abort_rejects() {
        let ledger = RejectionLedger::new();
        let queue = ResizableBoundedQueue::new(1).unwrap();
        let tracker = RejectionTracker::new(PoolKey::new("app", "p"), OverflowPolicy::Abort, &ledger);

        assert!(matches!(
            tracker.record_and_delegate(noop(), &queue),
            OverflowAction::Reject(PoolError::Rejected(_))
        ));
    }

    #[test]
    fn test_discard_oldest_evicts_head() {
        let ledger = RejectionLedger::new();
        let queue = ResizableBoundedQueue::new(2).unwrap();
        queue.try_enqueue(noop()).map_err(|_| ()).unwrap();
        queue.try_enqueue(noop()).map_err(|_| ()).unwrap();
        let tracker = RejectionTracker::new(PoolKey::new("app", "p"), OverflowPolicy::DiscardOldest, &ledger);

        let action = tracker.record_and_delegate(noop(), &queue);
        assert!(matches!(action, OverflowAction::Retry(_)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_custom_handler_name_and_ownership() {
        let ledger = RejectionLedger::new();
        let queue = ResizableBoundedQueue::new(1).unwrap();
        let handler = Arc::new(Parking { parked: Mutex::new(Vec::new()) });
        let tracker = RejectionTracker::new(
            PoolKey::new("app", "p"),
            OverflowPolicy::Custom(handler.clone()),
            &ledger,
        );

        assert_eq!(tracker.policy_name(), "ParkingPolicy");
        assert!(matches!(tracker.record_and_delegate(noop(), &queue), OverflowAction::Done));
        assert_eq!(handler.parked.lock().len(), 1);
        assert_eq!(tracker.rejected_count(), 1);
    }

    #[test]
    fn test_policy_from_kind() {
        let policy: OverflowPolicy = OverflowPolicyKind::CallerRuns.into();
        assert_eq!(policy.name(), "CallerRunsPolicy");
    }
}
