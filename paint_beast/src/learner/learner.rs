//! Learner thread: pulls batches from a [`DynamicBatcher`] and trains.
//!
//! The learner owns no model. Training is delegated to a [`TrainStep`],
//! which may hand back a new weight blob after any step. New blobs are
//! published on the learner's [`WeightChannel`] and passed to an optional
//! [`SnapshotSink`] (checkpointing, export).
//!
//! The thread exits when:
//! - the stop command is received via [`LearnerHandle`]
//! - `max_train_steps` is reached (if configured)
//! - its queue is closed, or drains with no producers left when
//!   `stop_when_idle` is set

use crate::batching::{Batch, BatchError, Batchable, DynamicBatcher, FrameImageBatch, Staleness};
use crate::core::weights::WeightChannel;
use crate::messages::{LearnerMsg, LearnerStats};
use crate::queue::QueueError;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// A training step that could not be completed. The batch is lost.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("train step failed: {0}")]
pub struct TrainError(pub String);

/// Result of one training step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainOutcome {
    pub loss: f32,
    /// Serialized weights to publish, if the model should be shared now.
    pub weights: Option<Vec<u8>>,
}

impl TrainOutcome {
    pub fn loss(loss: f32) -> Self {
        Self { loss, weights: None }
    }

    pub fn with_weights(mut self, blob: Vec<u8>) -> Self {
        self.weights = Some(blob);
        self
    }
}

/// One optimization step on a batch.
pub trait TrainStep<B>: Send {
    fn train(&mut self, batch: B) -> Result<TrainOutcome, TrainError>;
}

impl<B, F> TrainStep<B> for F
where
    F: FnMut(B) -> Result<TrainOutcome, TrainError> + Send,
{
    fn train(&mut self, batch: B) -> Result<TrainOutcome, TrainError> {
        self(batch)
    }
}

/// Called after every publish with the new version and blob.
pub trait SnapshotSink: Send {
    fn on_publish(&mut self, version: u64, blob: &[u8]);
}

impl<F> SnapshotSink for F
where
    F: FnMut(u64, &[u8]) + Send,
{
    fn on_publish(&mut self, version: u64, blob: &[u8]) {
        self(version, blob)
    }
}

/// Batch bookkeeping the learner needs for its stats.
pub trait TrainBatch: Send {
    /// Queue items in the batch.
    fn items(&self) -> usize;

    /// Environment steps covered by the batch.
    fn env_steps(&self) -> usize {
        self.items()
    }

    /// Weight lag against `current_version`, for batches that carry one.
    fn staleness(&self, _current_version: u64) -> Option<Staleness> {
        None
    }
}

impl TrainBatch for Batch {
    fn items(&self) -> usize {
        self.len()
    }

    fn env_steps(&self) -> usize {
        self.num_steps()
    }

    fn staleness(&self, current_version: u64) -> Option<Staleness> {
        Some(Batch::staleness(self, current_version))
    }
}

impl TrainBatch for FrameImageBatch {
    fn items(&self) -> usize {
        self.len()
    }
}

/// Learner configuration.
#[derive(Debug, Clone)]
pub struct LearnerConfig {
    /// Name used in logs and stats.
    pub name: String,
    /// Stats reporting frequency (in train steps)
    pub stats_freq: usize,
    /// Interval of the progress log line.
    pub log_interval: Duration,
    /// Maximum training steps (0 = unlimited)
    pub max_train_steps: usize,
    /// Exit once the queue is drained and every producer is gone.
    /// Otherwise wait for producers to come back.
    pub stop_when_idle: bool,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            name: "learner".to_string(),
            stats_freq: 100,
            log_interval: Duration::from_secs(5),
            max_train_steps: 0,
            stop_when_idle: false,
        }
    }
}

impl LearnerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set stats reporting frequency. Zero is treated as 1.
    pub fn with_stats_freq(mut self, freq: usize) -> Self {
        self.stats_freq = freq.max(1);
        self
    }

    pub fn with_log_interval(mut self, interval: Duration) -> Self {
        self.log_interval = interval;
        self
    }

    /// Set maximum training steps.
    ///
    /// Use 0 for unlimited training (will run until stop command or shutdown).
    pub fn with_max_train_steps(mut self, steps: usize) -> Self {
        self.max_train_steps = steps;
        self
    }

    pub fn with_stop_when_idle(mut self, stop: bool) -> Self {
        self.stop_when_idle = stop;
        self
    }
}

/// Learner handle for controlling spawned learner thread.
pub struct LearnerHandle {
    /// Returns the final stats when the learner exits.
    pub thread: std::thread::JoinHandle<LearnerStats>,
    /// Channel to receive stats from learner
    pub stats_rx: Receiver<LearnerStats>,
    pub cmd_tx: Sender<LearnerMsg>,
}

impl LearnerHandle {
    /// Send stop command to learner.
    ///
    /// The learner sees it after the current wait round or training step.
    /// Returns `false` if the learner is already gone.
    pub fn stop(&self) -> bool {
        self.cmd_tx.try_send(LearnerMsg::Stop).is_ok()
    }

    /// Send stop command and wait for learner to finish.
    pub fn stop_and_wait(self) -> std::thread::Result<LearnerStats> {
        let _ = self.cmd_tx.try_send(LearnerMsg::Stop);
        self.thread.join()
    }

    /// Oldest buffered stats report, or None if empty.
    pub fn get_stats(&self) -> Option<LearnerStats> {
        self.stats_rx.try_recv().ok()
    }

    /// Drain all available stats, oldest first.
    pub fn drain_stats(&self) -> Vec<LearnerStats> {
        let mut stats = Vec::new();
        while let Ok(s) = self.stats_rx.try_recv() {
            stats.push(s);
        }
        stats
    }

    pub fn request_stats(&self) -> bool {
        self.cmd_tx.try_send(LearnerMsg::RequestStats).is_ok()
    }

    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Wait for learner thread to finish.
    pub fn join(self) -> std::thread::Result<LearnerStats> {
        self.thread.join()
    }
}

/// Environment steps per second, zero for near-zero elapsed times.
#[inline]
fn safe_steps_per_second(steps: usize, elapsed_secs: f32) -> f32 {
    const MIN_ELAPSED: f32 = 1e-6;
    if elapsed_secs < MIN_ELAPSED {
        0.0
    } else {
        steps as f32 / elapsed_secs
    }
}

/// Learner over one queue.
pub struct Learner<T: Batchable, S> {
    config: LearnerConfig,
    batcher: DynamicBatcher<T>,
    train_step: S,
    weights: Arc<WeightChannel>,
    sink: Option<Box<dyn SnapshotSink>>,
}

impl<T, S> Learner<T, S>
where
    T: Batchable + 'static,
    T::Batch: TrainBatch,
    S: TrainStep<T::Batch> + 'static,
{
    pub fn new(
        config: LearnerConfig,
        batcher: DynamicBatcher<T>,
        train_step: S,
        weights: Arc<WeightChannel>,
    ) -> Self {
        Self {
            config,
            batcher,
            train_step,
            weights,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: impl SnapshotSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Spawn the learner thread.
    pub fn spawn(self) -> LearnerHandle {
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(100);
        let (stats_tx, stats_rx) = crossbeam_channel::bounded(100);
        let name = self.config.name.clone();

        let thread = std::thread::Builder::new()
            .name(format!("Learner-{}", name))
            .spawn(move || self.run(cmd_rx, stats_tx))
            .expect("Failed to spawn learner thread");

        LearnerHandle {
            thread,
            stats_rx,
            cmd_tx,
        }
    }

    fn run(mut self, cmd_rx: Receiver<LearnerMsg>, stats_tx: Sender<LearnerStats>) -> LearnerStats {
        let mut stats = LearnerStats::new(self.config.name.clone());
        stats.set_model_version(self.weights.version());
        let start = Instant::now();
        let mut last_log = start;

        log::info!("{} learner started", self.config.name);

        loop {
            if self.config.max_train_steps > 0 && stats.train_steps >= self.config.max_train_steps {
                break;
            }

            let mut stop = false;
            while let Ok(msg) = cmd_rx.try_recv() {
                match msg {
                    LearnerMsg::Stop => stop = true,
                    LearnerMsg::RequestStats => {
                        self.refresh(&mut stats, start);
                        let _ = stats_tx.try_send(stats.clone());
                    }
                }
            }
            if stop {
                break;
            }

            match self.batcher.poll_batch() {
                Ok(Some(batch)) => {
                    self.train_on(batch, &mut stats);
                    if stats.train_steps % self.config.stats_freq == 0 {
                        self.refresh(&mut stats, start);
                        let _ = stats_tx.try_send(stats.clone());
                    }
                }
                Ok(None) => {}
                Err(BatchError::Queue(QueueError::Closed)) => {
                    log::info!("{} learner: queue closed", self.config.name);
                    break;
                }
                Err(BatchError::Queue(QueueError::NoMoreProducers)) => {
                    if self.config.stop_when_idle {
                        log::info!("{} learner: no producers left", self.config.name);
                        break;
                    }
                    // Producers may still be reconnecting.
                    std::thread::sleep(self.batcher.config().timeout);
                }
                Err(e) => {
                    stats.rejected_batches += 1;
                    log::warn!("{} learner: batch rejected: {}", self.config.name, e);
                }
            }

            if last_log.elapsed() >= self.config.log_interval {
                last_log = Instant::now();
                self.refresh(&mut stats, start);
                log::info!(
                    "{}: Step {} @ {:.1} SPS. Queue size: {}. Loss: {:.4}",
                    self.config.name,
                    stats.frames_consumed,
                    stats.steps_per_second,
                    stats.queue_len,
                    stats.avg_loss
                );
            }
        }

        self.refresh(&mut stats, start);
        log::info!(
            "{} learner exiting after {} train steps ({} env steps)",
            self.config.name,
            stats.train_steps,
            stats.frames_consumed
        );
        stats
    }

    fn train_on(&mut self, batch: T::Batch, stats: &mut LearnerStats) {
        let items = batch.items();
        let env_steps = batch.env_steps();
        if let Some(staleness) = batch.staleness(self.weights.version()) {
            stats.record_staleness(staleness);
        }

        match self.train_step.train(batch) {
            Ok(outcome) => {
                stats.record_step(items, env_steps, outcome.loss);
                if let Some(blob) = outcome.weights {
                    let version = self.weights.publish(blob);
                    stats.set_model_version(version);
                    if let Some(sink) = self.sink.as_mut() {
                        sink.on_publish(version, self.weights.latest().blob());
                    }
                }
            }
            Err(e) => {
                stats.failed_steps += 1;
                log::warn!("{} learner: {}", self.config.name, e);
            }
        }
    }

    fn refresh(&self, stats: &mut LearnerStats, start: Instant) {
        let queue = self.batcher.queue();
        stats.set_queue(queue.len(), queue.utilization());
        stats.set_steps_per_second(safe_steps_per_second(
            stats.frames_consumed,
            start.elapsed().as_secs_f32(),
        ));
    }
}
