//! WorkerPoolController - a named worker pool whose sizing can change at runtime
//!
//! Submission follows standard executor semantics:
//! 1. fewer than `core_size` workers: start a worker for the item
//! 2. otherwise queue the item
//! 3. queue full: start a worker if fewer than `max_size`
//! 4. otherwise the overflow policy runs (through the `RejectionTracker`)
//!
//! Workers above `core_size` retire after `keep_alive` idle; core workers
//! wait indefinitely. Sizing changes wake idle workers so they re-evaluate.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dp_common::{PoolKey, PoolSnapshot, WorkerPoolConfig, WorkerPoolStats};
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::PoolError;
use crate::ledger::RejectionLedger;
use crate::pool_metrics;
use crate::queue::{ResizableBoundedQueue, QUEUE_TYPE};
use crate::rejection::{OverflowAction, OverflowPolicy, RejectionTracker};
use crate::Result;

/// Unit of work executed by pool workers.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Fields of a resize request; `None` leaves the field unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResizeRequest {
    pub core_size: Option<usize>,
    pub max_size: Option<usize>,
    pub queue_capacity: Option<usize>,
}

impl ResizeRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_core_size(mut self, core_size: usize) -> Self {
        self.core_size = Some(core_size);
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = Some(queue_capacity);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.core_size.is_none() && self.max_size.is_none() && self.queue_capacity.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
struct PoolSizing {
    core: usize,
    max: usize,
}

#[derive(Debug, Clone, Copy)]
enum Bound {
    Core,
    Max,
}

/// State shared between the controller and its worker tasks.
struct PoolShared {
    key: PoolKey,
    sizing: RwLock<PoolSizing>,
    keep_alive: Duration,
    queue: ResizableBoundedQueue<Task>,
    running: AtomicBool,
    worker_count: AtomicUsize,
    active_workers: AtomicUsize,
    completed: AtomicU64,
    /// Wakes idle workers after a sizing change or shutdown
    idle_wakeup: Notify,
}

impl PoolShared {
    fn sizes(&self) -> PoolSizing {
        *self.sizing.read()
    }

    /// Claim a worker slot if the pool is below `bound`.
    fn try_reserve_worker(&self, bound: Bound) -> bool {
        loop {
            let current = self.worker_count.load(Ordering::SeqCst);
            let sizing = self.sizes();
            let limit = match bound {
                Bound::Core => sizing.core,
                Bound::Max => sizing.max,
            };
            if current >= limit {
                return false;
            }
            if self
                .worker_count
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Give back a worker slot unless the count moved underneath us.
    fn try_release_worker(&self, expected: usize) -> bool {
        self.worker_count
            .compare_exchange(expected, expected - 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Release the slot of a worker that decided to exit. Returns `false`
    /// when the worker must stay.
    ///
    /// A submitter may queue an item between the worker's emptiness check and
    /// the release while still counting this worker, so it spawns none. The
    /// last worker out re-checks the queue and keeps a slot for such an item.
    fn retire(&self, workers: usize) -> bool {
        if !self.try_release_worker(workers) {
            return false;
        }
        if self.worker_count.load(Ordering::SeqCst) == 0
            && !self.queue.is_empty()
            && self.try_reserve_worker(Bound::Max)
        {
            debug!(pool = %self.key, "Worker kept for late queued item");
            return false;
        }
        true
    }

    /// Start a worker for a slot already claimed with `try_reserve_worker`.
    fn spawn_worker(self: &Arc<Self>, first_task: Option<Task>) {
        let shared = Arc::clone(self);
        debug!(
            pool = %self.key,
            workers = self.worker_count.load(Ordering::SeqCst),
            "Spawning pool worker"
        );
        tokio::spawn(async move {
            shared.run_worker(first_task).await;
        });
    }

    async fn run_worker(self: Arc<Self>, first_task: Option<Task>) {
        let mut next = first_task;

        loop {
            let task = match next.take() {
                Some(task) => task,
                None => match self.next_task().await {
                    Some(task) => task,
                    None => break,
                },
            };

            self.active_workers.fetch_add(1, Ordering::SeqCst);
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            self.active_workers.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);

            if outcome.is_err() {
                error!(pool = %self.key, "Pool task panicked");
            }
        }

        debug!(
            pool = %self.key,
            workers = self.worker_count.load(Ordering::SeqCst),
            "Pool worker exited"
        );
    }

    /// Next item for a worker, or `None` once the worker should retire.
    ///
    /// A `None` return has already released the worker's slot.
    async fn next_task(&self) -> Option<Task> {
        let mut timed_out = false;

        loop {
            let wakeup = self.idle_wakeup.notified();
            tokio::pin!(wakeup);
            wakeup.as_mut().enable();

            let shutting_down = !self.running.load(Ordering::SeqCst);
            let workers = self.worker_count.load(Ordering::SeqCst);
            let sizing = self.sizes();
            let timed = workers > sizing.core;

            if shutting_down && self.queue.is_empty() {
                if self.retire(workers) {
                    return None;
                }
                continue;
            }

            if (workers > sizing.max || (timed && timed_out))
                && (workers > 1 || self.queue.is_empty())
            {
                if self.retire(workers) {
                    return None;
                }
                continue;
            }

            if shutting_down {
                if let Some(task) = self.queue.try_dequeue() {
                    return Some(task);
                }
                continue;
            }

            if timed {
                tokio::select! {
                    task = self.queue.dequeue(self.keep_alive) => match task {
                        Some(task) => return Some(task),
                        None => timed_out = true,
                    },
                    _ = &mut wakeup => {}
                }
            } else {
                tokio::select! {
                    task = self.queue.take() => return Some(task),
                    _ = &mut wakeup => {}
                }
            }
        }
    }
}

pub struct WorkerPoolController {
    shared: Arc<PoolShared>,
    tracker: RejectionTracker,
    /// Serializes resize operations
    resize_lock: tokio::sync::Mutex<()>,
}

impl WorkerPoolController {
    /// Build a pool from its configuration. Workers start lazily on submit.
    pub fn new(
        config: WorkerPoolConfig,
        policy: OverflowPolicy,
        ledger: &RejectionLedger,
    ) -> Result<Self> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let key = config.key();
        let queue = ResizableBoundedQueue::new(config.queue_capacity)?;
        let tracker = RejectionTracker::new(key.clone(), policy, ledger);

        info!(
            pool = %key,
            core = config.core_size,
            max = config.max_size,
            queue_capacity = config.queue_capacity,
            policy = tracker.policy_name(),
            "Worker pool created"
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                key,
                sizing: RwLock::new(PoolSizing {
                    core: config.core_size,
                    max: config.max_size,
                }),
                keep_alive: Duration::from_secs(config.keep_alive_secs),
                queue,
                running: AtomicBool::new(true),
                worker_count: AtomicUsize::new(0),
                active_workers: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                idle_wakeup: Notify::new(),
            }),
            tracker,
            resize_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Hand a unit of work to the pool.
    ///
    /// With the caller-runs policy an overflowing item runs to completion
    /// before this returns. With abort (or a rejecting custom handler) the
    /// overflow surfaces as an error.
    pub async fn submit<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut task: Task = Box::pin(work);

        loop {
            if !self.shared.running.load(Ordering::SeqCst) {
                return Err(PoolError::ShutDown(self.shared.key.to_string()));
            }

            if self.shared.try_reserve_worker(Bound::Core) {
                self.shared.spawn_worker(Some(task));
                pool_metrics::record_submitted(&self.shared.key);
                return Ok(());
            }

            match self.shared.queue.try_enqueue(task) {
                Ok(()) => {
                    if self.shared.worker_count.load(Ordering::SeqCst) == 0
                        && self.shared.try_reserve_worker(Bound::Max)
                    {
                        self.shared.spawn_worker(None);
                    }
                    pool_metrics::record_submitted(&self.shared.key);
                    return Ok(());
                }
                Err(returned) => task = returned,
            }

            if self.shared.try_reserve_worker(Bound::Max) {
                self.shared.spawn_worker(Some(task));
                pool_metrics::record_submitted(&self.shared.key);
                return Ok(());
            }

            match self.tracker.record_and_delegate(task, &self.shared.queue) {
                OverflowAction::Reject(e) => return Err(e),
                OverflowAction::Done => return Ok(()),
                OverflowAction::Retry(returned) => task = returned,
                OverflowAction::RunOnCaller(returned) => {
                    returned.await;
                    return Ok(());
                }
            }
        }
    }

    /// Apply the fields present in `request`.
    ///
    /// Core and maximum sizes are written in the only order that keeps
    /// `core <= max` true after each write: a rising maximum is raised before
    /// the core moves, a falling maximum is lowered after it. If the resolved
    /// pair is invalid nothing changes.
    ///
    /// The queue capacity is applied last and independently. A failure there
    /// is returned as [`PoolError::QueueResize`] and leaves the already
    /// applied core/max change in place.
    pub async fn resize(&self, request: ResizeRequest) -> Result<()> {
        let _guard = self.resize_lock.lock().await;
        let key = &self.shared.key;

        let current = self.shared.sizes();
        let core = request.core_size.unwrap_or(current.core);
        let max = request.max_size.unwrap_or(current.max);

        if max == 0 || core > max {
            warn!(
                pool = %key,
                core = core,
                max = max,
                "Rejecting invalid pool sizing"
            );
            return Err(PoolError::InvalidConfig(format!(
                "core_size {} / max_size {} is not a valid sizing for pool {}",
                core, max, key
            )));
        }

        if max >= current.max {
            self.apply_max_size(max)?;
            self.apply_core_size(core)?;
        } else {
            self.apply_core_size(core)?;
            self.apply_max_size(max)?;
        }

        if core != current.core || max != current.max {
            pool_metrics::record_resized(key);
            info!(
                pool = %key,
                old_core = current.core,
                new_core = core,
                old_max = current.max,
                new_max = max,
                "Pool sizing updated"
            );
        }

        if let Some(capacity) = request.queue_capacity {
            match self.shared.queue.set_capacity(capacity) {
                Ok(old) => {
                    info!(
                        pool = %key,
                        old_capacity = old,
                        new_capacity = capacity,
                        "Pool queue capacity updated"
                    );
                }
                Err(e) => {
                    error!(pool = %key, capacity = capacity, error = %e, "Pool queue capacity update failed");
                    return Err(PoolError::QueueResize {
                        pool: key.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Set the core size alone; fails if it would exceed the maximum.
    pub async fn set_core_size(&self, core_size: usize) -> Result<()> {
        let _guard = self.resize_lock.lock().await;
        self.apply_core_size(core_size)
    }

    /// Set the maximum size alone; fails if it would fall below the core size.
    pub async fn set_max_size(&self, max_size: usize) -> Result<()> {
        let _guard = self.resize_lock.lock().await;
        self.apply_max_size(max_size)
    }

    fn apply_core_size(&self, core_size: usize) -> Result<()> {
        let old = {
            let mut sizing = self.shared.sizing.write();
            if core_size > sizing.max {
                return Err(PoolError::InvalidConfig(format!(
                    "core_size {} exceeds max_size {} for pool {}",
                    core_size, sizing.max, self.shared.key
                )));
            }
            std::mem::replace(&mut sizing.core, core_size)
        };

        if core_size < old {
            self.shared.idle_wakeup.notify_waiters();
        } else if core_size > old {
            // Queued work should not wait for the next submission to get workers
            let wanted = (core_size - old).min(self.shared.queue.len());
            for _ in 0..wanted {
                if !self.shared.try_reserve_worker(Bound::Core) {
                    break;
                }
                self.shared.spawn_worker(None);
            }
        }
        Ok(())
    }

    fn apply_max_size(&self, max_size: usize) -> Result<()> {
        let old = {
            let mut sizing = self.shared.sizing.write();
            if max_size == 0 || max_size < sizing.core {
                return Err(PoolError::InvalidConfig(format!(
                    "max_size {} is below core_size {} for pool {}",
                    max_size, sizing.core, self.shared.key
                )));
            }
            std::mem::replace(&mut sizing.max, max_size)
        };

        if max_size < old {
            self.shared.idle_wakeup.notify_waiters();
        }
        Ok(())
    }

    /// Current configuration. Core and maximum are read together.
    pub fn config(&self) -> WorkerPoolConfig {
        let sizing = self.shared.sizes();
        WorkerPoolConfig {
            app_name: self.shared.key.app_name.clone(),
            pool_name: self.shared.key.pool_name.clone(),
            core_size: sizing.core,
            max_size: sizing.max,
            queue_capacity: self.shared.queue.capacity(),
            keep_alive_secs: self.shared.keep_alive.as_secs(),
        }
    }

    /// Live statistics. Each field is read independently.
    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            active_workers: self.shared.active_workers.load(Ordering::SeqCst),
            current_pool_size: self.shared.worker_count.load(Ordering::SeqCst),
            queued_items: self.shared.queue.len(),
            remaining_queue_capacity: self.shared.queue.remaining_capacity(),
            completed_count: self.shared.completed.load(Ordering::SeqCst),
            rejected_count: self.tracker.rejected_count(),
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let snapshot = PoolSnapshot {
            config: self.config(),
            stats: self.stats(),
            policy_name: self.tracker.policy_name().to_string(),
            queue_type: QUEUE_TYPE.to_string(),
            captured_at: Utc::now(),
        };
        pool_metrics::set_pool_gauges(&snapshot);
        snapshot
    }

    /// Stop accepting work. Queued items still run; workers exit once the
    /// queue is empty.
    pub fn shutdown(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            info!(
                pool = %self.shared.key,
                queued = self.shared.queue.len(),
                "Shutting down worker pool"
            );
            self.shared.idle_wakeup.notify_waiters();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        !self.shared.running.load(Ordering::SeqCst)
    }

    /// True once shut down with every worker gone.
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.shared.worker_count.load(Ordering::SeqCst) == 0
    }

    /// Wait for termination after [`shutdown`](Self::shutdown).
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_terminated() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    pub fn key(&self) -> &PoolKey {
        &self.shared.key
    }

    pub fn name(&self) -> &str {
        &self.shared.key.pool_name
    }

    pub fn core_size(&self) -> usize {
        self.shared.sizes().core
    }

    pub fn max_size(&self) -> usize {
        self.shared.sizes().max
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn pool_size(&self) -> usize {
        self.shared.worker_count.load(Ordering::SeqCst)
    }

    pub fn active_workers(&self) -> usize {
        self.shared.active_workers.load(Ordering::SeqCst)
    }

    pub fn completed_count(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    pub fn rejected_count(&self) -> u64 {
        self.tracker.rejected_count()
    }

    pub fn policy(&self) -> &OverflowPolicy {
        self.tracker.policy()
    }
}

impl Drop for WorkerPoolController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
