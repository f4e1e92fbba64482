//! ResizableBoundedQueue Tests
//!
//! Tests for:
//! - Blocked producers reacting to capacity changes
//! - Items retained above a lowered capacity
//! - Bounded size under concurrent producers and consumers
//! - FIFO ordering
//! - Timeout and cancellation leaving the queue untouched

use std::sync::Arc;
use std::time::Duration;

use dp_pool::{EnqueueError, ResizableBoundedQueue};
use tokio_util::sync::CancellationToken;

const GUARD: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_capacity_increase_unblocks_producer_without_dequeue() {
    let queue = Arc::new(ResizableBoundedQueue::new(1).unwrap());
    queue.try_enqueue(1u32).unwrap();

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.enqueue(2).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!producer.is_finished(), "producer should block on a full queue");
    assert_eq!(queue.len(), 1);

    queue.set_capacity(2).unwrap();

    tokio::time::timeout(GUARD, producer)
        .await
        .expect("producer should be released by the capacity increase")
        .unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.remaining_capacity(), 0);
}

#[tokio::test]
async fn test_capacity_increase_releases_every_blocked_producer() {
    let queue = Arc::new(ResizableBoundedQueue::new(1).unwrap());
    queue.try_enqueue(0u32).unwrap();

    let producers: Vec<_> = (1..=3)
        .map(|i| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(i).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.set_capacity(4).unwrap();

    for producer in producers {
        tokio::time::timeout(GUARD, producer).await.unwrap().unwrap();
    }
    assert_eq!(queue.len(), 4);
}

#[tokio::test]
async fn test_capacity_decrease_retains_items_and_blocks_until_drained() {
    let queue = Arc::new(ResizableBoundedQueue::new(4).unwrap());
    for i in 0..4u32 {
        queue.try_enqueue(i).unwrap();
    }

    assert_eq!(queue.set_capacity(2).unwrap(), 4);
    assert_eq!(queue.len(), 4, "lowering the bound must not drop items");
    assert_eq!(queue.remaining_capacity(), 0);
    assert_eq!(queue.try_enqueue(99), Err(99));

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.enqueue(4).await })
    };

    // Draining down to the new bound is not enough
    assert_eq!(queue.try_dequeue(), Some(0));
    assert_eq!(queue.try_dequeue(), Some(1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!producer.is_finished());
    assert_eq!(queue.len(), 2);

    assert_eq!(queue.try_dequeue(), Some(2));
    tokio::time::timeout(GUARD, producer).await.unwrap().unwrap();

    assert_eq!(queue.len(), 2);
    assert_eq!(queue.drain(), vec![3, 4]);
}

#[tokio::test]
async fn test_zero_capacity_change_rejected() {
    let queue = ResizableBoundedQueue::<u32>::new(3).unwrap();
    assert!(queue.set_capacity(0).is_err());
    assert_eq!(queue.capacity(), 3);
}

#[tokio::test]
async fn test_fifo_order() {
    let queue = ResizableBoundedQueue::new(10).unwrap();
    for i in 0..10u32 {
        queue.enqueue(i).await;
    }

    let mut out = Vec::new();
    while let Some(item) = queue.dequeue(Duration::from_millis(10)).await {
        out.push(item);
    }
    assert_eq!(out, (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_take_waits_for_producer() {
    let queue = Arc::new(ResizableBoundedQueue::new(2).unwrap());

    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.take().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.try_enqueue(7u32).unwrap();

    assert_eq!(tokio::time::timeout(GUARD, consumer).await.unwrap().unwrap(), 7);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_dequeue_timeout_on_empty_queue() {
    let queue = ResizableBoundedQueue::<u32>::new(2).unwrap();
    assert_eq!(queue.dequeue(Duration::from_millis(20)).await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_size_bounded_under_concurrent_growth() {
    let queue = Arc::new(ResizableBoundedQueue::new(2).unwrap());
    let producers = 8;
    let per_producer = 200u32;

    let mut handles = Vec::new();
    for p in 0..producers {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..per_producer {
                queue.enqueue(p * per_producer + i).await;
            }
        }));
    }

    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            let mut received = 0u32;
            while received < producers * per_producer {
                queue.take().await;
                received += 1;
                if received % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            received
        })
    };

    // Capacity only grows here, so a size read before the capacity can
    // never exceed it
    let observer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            for _ in 0..500 {
                let len = queue.len();
                let capacity = queue.capacity();
                assert!(len <= capacity, "size {} exceeded capacity {}", len, capacity);
                tokio::task::yield_now().await;
            }
        })
    };

    for capacity in [4, 8, 16, 32] {
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.set_capacity(capacity).unwrap();
    }

    for handle in handles {
        tokio::time::timeout(GUARD, handle).await.unwrap().unwrap();
    }
    let received = tokio::time::timeout(GUARD, consumer).await.unwrap().unwrap();
    tokio::time::timeout(GUARD, observer).await.unwrap().unwrap();

    assert_eq!(received, producers * per_producer);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_enqueue_timeout_returns_item() {
    let queue = ResizableBoundedQueue::new(1).unwrap();
    queue.try_enqueue("first").unwrap();

    let result = queue.enqueue_timeout("second", Duration::from_millis(30)).await;
    match result {
        Err(EnqueueError::Timeout(item)) => assert_eq!(item, "second"),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_cancelled_enqueue_leaves_queue_unchanged() {
    let queue = Arc::new(ResizableBoundedQueue::new(1).unwrap());
    queue.try_enqueue(1u32).unwrap();
    let token = CancellationToken::new();

    let producer = {
        let queue = queue.clone();
        let token = token.clone();
        tokio::spawn(async move { queue.enqueue_cancellable(2, &token).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(GUARD, producer).await.unwrap().unwrap();
    assert_eq!(result.map_err(EnqueueError::into_inner), Err(2));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.try_dequeue(), Some(1));
}

#[tokio::test]
async fn test_dropped_enqueue_leaves_queue_unchanged() {
    let queue = ResizableBoundedQueue::new(1).unwrap();
    queue.try_enqueue(1u32).unwrap();

    tokio::select! {
        _ = queue.enqueue(2) => panic!("queue is full"),
        _ = tokio::time::sleep(Duration::from_millis(20)) => {}
    }

    // A later capacity change must not resurrect the dropped item
    queue.set_capacity(2).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.drain(), vec![1]);
}
