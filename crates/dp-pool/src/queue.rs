//! ResizableBoundedQueue - FIFO work queue whose capacity can change while in use
//!
//! A single mutex guards both the items and the capacity, so every
//! "is there room?" check sees a consistent bound. Two `Notify` conditions
//! carry wake-ups:
//! - `not_empty`: one consumer per enqueued item
//! - `not_full`: one producer per dequeued item, and *all* producers whenever
//!   the capacity changes
//!
//! Waiters register interest (`Notified::enable`) before inspecting the state,
//! so a capacity change or dequeue that lands between the check and the wait
//! is never lost.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::PoolError;
use crate::Result;

/// Name reported as the queue type in pool snapshots.
pub const QUEUE_TYPE: &str = "ResizableBoundedQueue";

/// Why an item could not be enqueued. The item is handed back to the caller.
#[derive(Debug)]
pub enum EnqueueError<T> {
    Timeout(T),
    Cancelled(T),
}

impl<T> EnqueueError<T> {
    pub fn into_inner(self) -> T {
        match self {
            EnqueueError::Timeout(item) | EnqueueError::Cancelled(item) => item,
        }
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    capacity: usize,
}

pub struct ResizableBoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> ResizableBoundedQueue<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "queue capacity must be positive".to_string(),
            ));
        }

        Ok(Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                capacity,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        })
    }

    /// Append without waiting; hands the item back if the queue is full.
    pub fn try_enqueue(&self, item: T) -> std::result::Result<(), T> {
        {
            let mut state = self.state.lock();
            if state.items.len() >= state.capacity {
                return Err(item);
            }
            state.items.push_back(item);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Wait until there is room, then append.
    ///
    /// Cancel-safe: dropping the future before it completes leaves the queue
    /// untouched (the item is dropped with the future).
    pub async fn enqueue(&self, mut item: T) {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_enqueue(item) {
                Ok(()) => return,
                Err(returned) => item = returned,
            }

            notified.await;
        }
    }

    /// Like [`enqueue`](Self::enqueue) but gives the item back after `timeout`.
    pub async fn enqueue_timeout(
        &self,
        item: T,
        timeout: Duration,
    ) -> std::result::Result<(), EnqueueError<T>> {
        let deadline = tokio::time::Instant::now() + timeout;
        self.enqueue_until(item, tokio::time::sleep_until(deadline), EnqueueError::Timeout)
            .await
    }

    /// Like [`enqueue`](Self::enqueue) but gives the item back once `token` is cancelled.
    pub async fn enqueue_cancellable(
        &self,
        item: T,
        token: &CancellationToken,
    ) -> std::result::Result<(), EnqueueError<T>> {
        self.enqueue_until(item, token.cancelled(), EnqueueError::Cancelled)
            .await
    }

    async fn enqueue_until<F>(
        &self,
        mut item: T,
        stop: F,
        on_stop: fn(T) -> EnqueueError<T>,
    ) -> std::result::Result<(), EnqueueError<T>>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);

        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_enqueue(item) {
                Ok(()) => return Ok(()),
                Err(returned) => item = returned,
            }

            tokio::select! {
                biased;
                _ = &mut notified => {}
                _ = &mut stop => return Err(on_stop(item)),
            }
        }
    }

    /// Remove the oldest item without waiting.
    pub fn try_dequeue(&self) -> Option<T> {
        let item = self.state.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Wait for the oldest item.
    ///
    /// Cancel-safe: an item is only removed on the poll that returns it.
    pub async fn take(&self) -> T {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_dequeue() {
                return item;
            }

            notified.await;
        }
    }

    /// Wait up to `timeout` for the oldest item.
    pub async fn dequeue(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.take()).await.ok()
    }

    /// Change the bound.
    ///
    /// Items above a lowered bound are kept; producers stay blocked until
    /// consumers drain below it. Every blocked producer re-checks against the
    /// new bound. Returns the previous capacity.
    pub fn set_capacity(&self, new_capacity: usize) -> Result<usize> {
        if new_capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "queue capacity must be positive".to_string(),
            ));
        }

        let (old_capacity, len) = {
            let mut state = self.state.lock();
            let old = std::mem::replace(&mut state.capacity, new_capacity);
            (old, state.items.len())
        };

        self.not_full.notify_waiters();

        debug!(
            old_capacity = old_capacity,
            new_capacity = new_capacity,
            queued = len,
            "Queue capacity changed"
        );
        Ok(old_capacity)
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Free slots; zero while the queue holds more than a lowered capacity.
    pub fn remaining_capacity(&self) -> usize {
        let state = self.state.lock();
        state.capacity.saturating_sub(state.items.len())
    }

    /// Remove every queued item, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = self.state.lock().items.drain(..).collect();
        if !drained.is_empty() {
            self.not_full.notify_waiters();
        }
        drained
    }
}
