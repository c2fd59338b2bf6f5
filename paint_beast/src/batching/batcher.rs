//! Dynamic batcher: turns a trickle of queue items into fixed-size batches.

use super::batch::{BatchError, Batchable};
use crate::queue::BoundedQueue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// What the batcher does when items arrive slower than the batch fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Only ever emit exactly `batch_size` items.
    #[default]
    Strict,
    /// Emit a short batch after a wait round that left it incomplete.
    Lenient,
}

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    pub batch_size: usize,
    pub mode: BatchMode,
    /// Longest single wait for more items.
    pub timeout: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            mode: BatchMode::Strict,
            timeout: Duration::from_millis(100),
        }
    }
}

impl BatcherConfig {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: BatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherStats {
    pub batches: u64,
    /// Lenient batches smaller than `batch_size`.
    pub short_batches: u64,
    pub items: u64,
    /// Batches dropped because their items did not share a layout.
    pub rejected_batches: u64,
    /// Wait rounds that ended without a batch.
    pub empty_rounds: u64,
}

/// Drains a [`BoundedQueue`] into batches.
///
/// Items already pulled from the queue stay in the batcher until they are
/// emitted, so a strict batcher that reports `NoMoreProducers` loses nothing.
pub struct DynamicBatcher<T: Batchable> {
    queue: Arc<BoundedQueue<T>>,
    config: BatcherConfig,
    pending: Vec<T>,
    stats: BatcherStats,
}

impl<T: Batchable> DynamicBatcher<T> {
    pub fn new(queue: Arc<BoundedQueue<T>>, config: BatcherConfig) -> Self {
        let config = BatcherConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        Self {
            pending: Vec::with_capacity(config.batch_size),
            queue,
            config,
            stats: BatcherStats::default(),
        }
    }

    /// Block until a batch is ready.
    ///
    /// Strict mode returns exactly `batch_size` items or the queue's error.
    /// Lenient mode may return fewer after a wait round, and flushes any
    /// remainder before reporting `NoMoreProducers` or `Closed`.
    pub fn next_batch(&mut self) -> Result<T::Batch, BatchError> {
        loop {
            if let Some(batch) = self.poll_batch()? {
                return Ok(batch);
            }
        }
    }

    /// Run one wait round of at most `timeout`.
    ///
    /// Returns `Ok(None)` when the round ended without a batch; callers can
    /// check for commands between rounds.
    pub fn poll_batch(&mut self) -> Result<Option<T::Batch>, BatchError> {
        let missing = self.config.batch_size - self.pending.len();
        match self.queue.dequeue_batch_or_wait(missing, self.config.timeout) {
            Ok(items) => {
                self.pending.extend(items);
                if self.pending.len() >= self.config.batch_size {
                    return self.emit().map(Some);
                }
                if self.config.mode == BatchMode::Lenient && !self.pending.is_empty() {
                    return self.emit().map(Some);
                }
                self.stats.empty_rounds += 1;
                Ok(None)
            }
            Err(e) => {
                if self.config.mode == BatchMode::Lenient && !self.pending.is_empty() {
                    log::debug!("flushing {} pending items before {}", self.pending.len(), e);
                    return self.emit().map(Some);
                }
                Err(e.into())
            }
        }
    }

    fn emit(&mut self) -> Result<T::Batch, BatchError> {
        let items = std::mem::replace(&mut self.pending, Vec::with_capacity(self.config.batch_size));
        let count = items.len();
        match T::assemble(items) {
            Ok(batch) => {
                self.stats.batches += 1;
                self.stats.items += count as u64;
                if count < self.config.batch_size {
                    self.stats.short_batches += 1;
                }
                Ok(batch)
            }
            Err(e) => {
                self.stats.rejected_batches += 1;
                log::warn!("dropping batch of {} items: {}", count, e);
                Err(e)
            }
        }
    }

    /// Items pulled from the queue but not yet emitted.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<BoundedQueue<T>> {
        &self.queue
    }

    pub fn stats(&self) -> BatcherStats {
        self.stats
    }
}
