//! Tests for the bounded queue.
//!
//! Test categories:
//! 1. Capacity and submit modes
//! 2. Ordering (per-producer FIFO, round-robin)
//! 3. Producer lifecycle and close
//! 4. Concurrency (exactly-once delivery, backpressure)

use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::*;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Item {
    producer: ProducerId,
    value: u64,
}

impl Produced for Item {
    fn producer(&self) -> ProducerId {
        self.producer
    }
}

fn item(producer: ProducerId, value: u64) -> Item {
    Item { producer, value }
}

const SHORT: Duration = Duration::from_millis(20);

// =============================================================================
// CAPACITY AND SUBMIT MODES
// =============================================================================

#[test]
fn test_capacity_is_at_least_one() {
    let q: BoundedQueue<Item> = BoundedQueue::new(0, SubmitMode::Blocking);
    assert_eq!(q.capacity(), 1);
}

#[test]
fn test_non_blocking_rejects_when_full() {
    let q = BoundedQueue::new(2, SubmitMode::NonBlocking);
    q.enqueue(item(0, 1)).unwrap();
    q.enqueue(item(0, 2)).unwrap();

    assert_eq!(q.enqueue(item(0, 3)), Err(QueueError::QueueFull { capacity: 2 }));
    assert_eq!(q.len(), 2);
    assert_eq!(q.stats().rejected_full, 1);
}

#[test]
fn test_try_enqueue_ignores_blocking_mode() {
    let q = BoundedQueue::new(1, SubmitMode::Blocking);
    q.enqueue(item(0, 1)).unwrap();
    assert!(matches!(q.try_enqueue(item(0, 2)), Err(QueueError::QueueFull { .. })));
}

#[test]
fn test_dequeue_returns_immediately_when_enough() {
    let q = BoundedQueue::new(8, SubmitMode::Blocking);
    for v in 0..5 {
        q.enqueue(item(0, v)).unwrap();
    }

    let start = Instant::now();
    let got = q.dequeue_batch_or_wait(3, Duration::from_secs(10)).unwrap();
    assert_eq!(got.len(), 3);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(q.len(), 2);
}

#[test]
fn test_dequeue_returns_partial_after_timeout() {
    let q = BoundedQueue::new(8, SubmitMode::Blocking);
    q.enqueue(item(0, 1)).unwrap();

    let start = Instant::now();
    let got = q.dequeue_batch_or_wait(4, SHORT).unwrap();
    assert_eq!(got, vec![item(0, 1)]);
    assert!(start.elapsed() >= SHORT);
}

#[test]
fn test_dequeue_empty_after_timeout_without_producers_seen() {
    let q: BoundedQueue<Item> = BoundedQueue::new(8, SubmitMode::Blocking);
    // Never had producers: an empty result, not NoMoreProducers.
    assert_eq!(q.dequeue_batch_or_wait(4, SHORT), Ok(vec![]));
}

#[test]
fn test_stats_track_high_watermark() {
    let q = BoundedQueue::new(8, SubmitMode::Blocking);
    for v in 0..5 {
        q.enqueue(item(0, v)).unwrap();
    }
    q.dequeue_batch_or_wait(5, SHORT).unwrap();
    q.enqueue(item(0, 9)).unwrap();

    let stats = q.stats();
    assert_eq!(stats.enqueued, 6);
    assert_eq!(stats.dequeued, 5);
    assert_eq!(stats.high_watermark, 5);
    assert_eq!(stats.len, 1);
    assert_eq!(stats.capacity, 8);
}

// =============================================================================
// ORDERING
// =============================================================================

#[test]
fn test_per_producer_fifo() {
    let q = BoundedQueue::new(32, SubmitMode::Blocking);
    for v in 0..5 {
        q.enqueue(item(0, v)).unwrap();
        q.enqueue(item(1, 100 + v)).unwrap();
    }

    let got = q.dequeue_batch_or_wait(10, SHORT).unwrap();
    let from = |p: ProducerId| -> Vec<u64> {
        got.iter().filter(|i| i.producer == p).map(|i| i.value).collect()
    };
    assert_eq!(from(0), vec![0, 1, 2, 3, 4]);
    assert_eq!(from(1), vec![100, 101, 102, 103, 104]);
}

#[test]
fn test_round_robin_across_producers() {
    let q = BoundedQueue::new(32, SubmitMode::Blocking);
    // Producer 0 floods before producer 1 shows up.
    for v in 0..6 {
        q.enqueue(item(0, v)).unwrap();
    }
    q.enqueue(item(1, 100)).unwrap();

    let got = q.dequeue_batch_or_wait(2, SHORT).unwrap();
    assert_eq!(got, vec![item(0, 0), item(1, 100)]);
}

// =============================================================================
// PRODUCER LIFECYCLE AND CLOSE
// =============================================================================

#[test]
fn test_no_more_producers_after_all_leave() {
    let q = Arc::new(BoundedQueue::<Item>::new(4, SubmitMode::Blocking));
    let a = q.register_producer(0);
    let b = q.register_producer(1);
    assert_eq!(q.live_producers(), 2);

    drop(a);
    assert_eq!(q.dequeue_batch_or_wait(1, SHORT), Ok(vec![]));
    drop(b);
    assert_eq!(q.live_producers(), 0);
    assert_eq!(
        q.dequeue_batch_or_wait(1, Duration::from_secs(5)),
        Err(QueueError::NoMoreProducers)
    );
}

#[test]
fn test_remaining_items_drain_before_no_more_producers() {
    let q = Arc::new(BoundedQueue::new(4, SubmitMode::Blocking));
    let guard = q.register_producer(0);
    q.enqueue(item(0, 1)).unwrap();
    drop(guard);

    let start = Instant::now();
    let got = q.dequeue_batch_or_wait(3, Duration::from_secs(5)).unwrap();
    assert_eq!(got, vec![item(0, 1)]);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(
        q.dequeue_batch_or_wait(3, Duration::from_secs(5)),
        Err(QueueError::NoMoreProducers)
    );
}

#[test]
fn test_departure_wakes_waiting_consumer() {
    let q = Arc::new(BoundedQueue::<Item>::new(4, SubmitMode::Blocking));
    let guard = q.register_producer(0);

    let consumer = {
        let q = Arc::clone(&q);
        thread::spawn(move || q.dequeue_batch_or_wait(1, Duration::from_secs(30)))
    };
    thread::sleep(SHORT);
    let start = Instant::now();
    drop(guard);

    assert_eq!(consumer.join().unwrap(), Err(QueueError::NoMoreProducers));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_close_rejects_enqueue_and_drains() {
    let q = BoundedQueue::new(4, SubmitMode::Blocking);
    q.enqueue(item(0, 1)).unwrap();
    q.close();
    assert!(q.is_closed());

    assert_eq!(q.enqueue(item(0, 2)), Err(QueueError::Closed));
    assert_eq!(q.dequeue_batch_or_wait(4, SHORT), Ok(vec![item(0, 1)]));
    assert_eq!(q.dequeue_batch_or_wait(4, SHORT), Err(QueueError::Closed));
}

#[test]
fn test_close_releases_blocked_producer() {
    let q = Arc::new(BoundedQueue::new(1, SubmitMode::Blocking));
    q.enqueue(item(0, 1)).unwrap();

    let producer = {
        let q = Arc::clone(&q);
        thread::spawn(move || q.enqueue(item(0, 2)))
    };
    thread::sleep(SHORT);
    q.close();

    assert_eq!(producer.join().unwrap(), Err(QueueError::Closed));
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[test]
fn test_fifth_blocking_enqueue_waits_for_dequeue() {
    let q = Arc::new(BoundedQueue::new(4, SubmitMode::Blocking));
    for v in 0..4 {
        q.enqueue(item(0, v)).unwrap();
    }

    let (tx, rx) = mpsc::channel();
    let producer = {
        let q = Arc::clone(&q);
        thread::spawn(move || {
            let result = q.enqueue(item(0, 4));
            tx.send(()).unwrap();
            result
        })
    };

    // Still blocked while the queue is full.
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(q.len(), 4);

    let got = q.dequeue_batch_or_wait(1, SHORT).unwrap();
    assert_eq!(got, vec![item(0, 0)]);
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    producer.join().unwrap().unwrap();

    assert_eq!(q.len(), 4);
    assert_eq!(q.stats().blocked_enqueues, 1);
}

#[test]
fn test_exactly_once_under_contention() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: u64 = 500;

    let q = Arc::new(BoundedQueue::new(8, SubmitMode::Blocking));
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let guard = q.register_producer(p);
            thread::spawn(move || {
                for v in 0..PER_PRODUCER {
                    guard.queue().enqueue(item(p, v)).unwrap();
                    assert!(guard.queue().len() <= guard.queue().capacity());
                }
            })
        })
        .collect();

    let mut last = vec![None::<u64>; PRODUCERS];
    let mut seen = HashSet::new();
    loop {
        match q.dequeue_batch_or_wait(7, SHORT) {
            Ok(batch) => {
                for it in batch {
                    // Per-producer FIFO.
                    if let Some(prev) = last[it.producer] {
                        assert!(it.value > prev);
                    }
                    last[it.producer] = Some(it.value);
                    assert!(seen.insert((it.producer, it.value)), "duplicate {:?}", it);
                }
            }
            Err(QueueError::NoMoreProducers) => break,
            Err(e) => panic!("unexpected {}", e),
        }
    }

    for p in producers {
        p.join().unwrap();
    }
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER as usize);
    assert!(q.stats().high_watermark <= 8);
}
