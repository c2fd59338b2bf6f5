//! Bounded multi-producer queue with per-producer lanes.
//!
//! Each producer owns a FIFO lane. The consumer takes one item per producer
//! in round-robin order, so per-producer order is preserved while no single
//! fast producer can starve the others. There is no global ordering across
//! producers.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Identifies the producer an item came from.
pub type ProducerId = usize;

/// Items that know which producer made them.
pub trait Produced: Send {
    fn producer(&self) -> ProducerId;
}

/// What `enqueue` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Wait until the consumer frees a slot.
    #[default]
    Blocking,
    /// Fail immediately with [`QueueError::QueueFull`].
    NonBlocking,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Non-blocking submission into a full queue.
    #[error("queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
    /// Every registered producer has left and nothing is queued.
    #[error("no producers remain and the queue is empty")]
    NoMoreProducers,
    /// The queue was closed.
    #[error("queue is closed")]
    Closed,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
    pub live_producers: usize,
    pub enqueued: u64,
    pub dequeued: u64,
    /// Enqueues that had to wait for space at least once.
    pub blocked_enqueues: u64,
    /// Non-blocking enqueues refused because the queue was full.
    pub rejected_full: u64,
    /// Largest `len` observed.
    pub high_watermark: usize,
}

struct QueueState<T> {
    lanes: HashMap<ProducerId, VecDeque<T>>,
    /// Producers with a non-empty lane, in service order.
    ready: VecDeque<ProducerId>,
    len: usize,
    live_producers: usize,
    /// At least one producer has registered since creation.
    had_producers: bool,
    closed: bool,
    stats: QueueStats,
}

impl<T> QueueState<T> {
    fn push(&mut self, producer: ProducerId, item: T) {
        let lane = self.lanes.entry(producer).or_default();
        if lane.is_empty() {
            self.ready.push_back(producer);
        }
        lane.push_back(item);
        self.len += 1;
        self.stats.enqueued += 1;
        self.stats.high_watermark = self.stats.high_watermark.max(self.len);
    }

    fn pop(&mut self) -> Option<T> {
        let producer = self.ready.pop_front()?;
        let lane = self.lanes.get_mut(&producer)?;
        let item = lane.pop_front()?;
        if lane.is_empty() {
            self.lanes.remove(&producer);
        } else {
            self.ready.push_back(producer);
        }
        self.len -= 1;
        self.stats.dequeued += 1;
        Some(item)
    }

    fn take(&mut self, n: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(n.min(self.len));
        while out.len() < n {
            match self.pop() {
                Some(item) => out.push(item),
                None => break,
            }
        }
        out
    }

    fn producers_gone(&self) -> bool {
        self.had_producers && self.live_producers == 0
    }
}

/// Bounded queue shared by many producers and drained in batches.
///
/// Capacity is never exceeded and every accepted item is handed out exactly
/// once.
pub struct BoundedQueue<T> {
    capacity: usize,
    mode: SubmitMode,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T: Produced> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize, mode: SubmitMode) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            mode,
            state: Mutex::new(QueueState {
                lanes: HashMap::new(),
                ready: VecDeque::new(),
                len: 0,
                live_producers: 0,
                had_producers: false,
                closed: false,
                stats: QueueStats {
                    capacity,
                    ..QueueStats::default()
                },
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Enqueue using the queue's configured [`SubmitMode`].
    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        self.enqueue_with(item, self.mode)
    }

    /// Enqueue without waiting for space.
    pub fn try_enqueue(&self, item: T) -> Result<(), QueueError> {
        self.enqueue_with(item, SubmitMode::NonBlocking)
    }

    /// Enqueue with an explicit mode.
    ///
    /// In blocking mode this waits until space frees up or the queue closes.
    pub fn enqueue_with(&self, item: T, mode: SubmitMode) -> Result<(), QueueError> {
        let producer = item.producer();
        let mut state = self.state.lock();
        let mut waited = false;

        loop {
            if state.closed {
                return Err(QueueError::Closed);
            }
            if state.len < self.capacity {
                break;
            }
            match mode {
                SubmitMode::NonBlocking => {
                    state.stats.rejected_full += 1;
                    return Err(QueueError::QueueFull {
                        capacity: self.capacity,
                    });
                }
                SubmitMode::Blocking => {
                    if !waited {
                        waited = true;
                        state.stats.blocked_enqueues += 1;
                    }
                    self.not_full.wait(&mut state);
                }
            }
        }

        state.push(producer, item);
        drop(state);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Take up to `n` items.
    ///
    /// Returns immediately once `n` items are available. Otherwise waits until
    /// `timeout` elapses and returns whatever is queued by then, possibly
    /// nothing. Fails with `NoMoreProducers` when every registered producer
    /// has left and the queue is empty, and with `Closed` once a closed queue
    /// has been drained.
    pub fn dequeue_batch_or_wait(&self, n: usize, timeout: Duration) -> Result<Vec<T>, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        let items = loop {
            if state.len >= n {
                break state.take(n);
            }
            if state.closed {
                if state.len == 0 {
                    return Err(QueueError::Closed);
                }
                break state.take(n);
            }
            if state.producers_gone() {
                if state.len == 0 {
                    return Err(QueueError::NoMoreProducers);
                }
                // Nothing more can arrive.
                break state.take(n);
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                break state.take(n);
            }
        };

        drop(state);
        if !items.is_empty() {
            self.not_full.notify_all();
        }
        Ok(items)
    }

    /// Register a producer. The registration ends when the guard drops.
    pub fn register_producer(self: &Arc<Self>, id: ProducerId) -> ProducerGuard<T> {
        let mut state = self.state.lock();
        state.live_producers += 1;
        state.had_producers = true;
        drop(state);
        log::debug!("producer {} registered", id);
        ProducerGuard {
            queue: Arc::clone(self),
            id,
        }
    }

    fn unregister_producer(&self, id: ProducerId) {
        let mut state = self.state.lock();
        state.live_producers = state.live_producers.saturating_sub(1);
        let remaining = state.live_producers;
        drop(state);
        log::debug!("producer {} left ({} remaining)", id, remaining);
        // Waiting consumers re-check for NoMoreProducers.
        self.not_empty.notify_all();
    }

    /// Close the queue.
    ///
    /// Pending and future enqueues fail with `Closed`. The consumer can still
    /// drain what is queued.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mode(&self) -> SubmitMode {
        self.mode
    }

    pub fn live_producers(&self) -> usize {
        self.state.lock().live_producers
    }

    /// Fill level as a fraction of capacity.
    pub fn utilization(&self) -> f32 {
        self.len() as f32 / self.capacity as f32
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            len: state.len,
            live_producers: state.live_producers,
            ..state.stats
        }
    }
}

/// Live registration of one producer.
pub struct ProducerGuard<T: Produced> {
    queue: Arc<BoundedQueue<T>>,
    id: ProducerId,
}

impl<T: Produced> ProducerGuard<T> {
    pub fn id(&self) -> ProducerId {
        self.id
    }

    pub fn queue(&self) -> &Arc<BoundedQueue<T>> {
        &self.queue
    }
}

impl<T: Produced> Drop for ProducerGuard<T> {
    fn drop(&mut self) {
        self.queue.unregister_producer(self.id);
    }
}
