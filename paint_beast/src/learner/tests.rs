//! Tests for the learner thread.
//!
//! Test categories:
//! 1. Training and step limits
//! 2. Weight publishing and snapshot sinks
//! 3. Staleness and batch bookkeeping
//! 4. Lifecycle (stop, close, idle producers)
//! 5. Failures (rejected batches, failed steps)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;
use crate::batching::{Batch, BatcherConfig, DynamicBatcher, FrameImageBatch};
use crate::core::step::{FrameImagePair, Rollout, Step};
use crate::core::tensor::{DType, TensorBlob};
use crate::core::weights::{weight_channel, SharedWeightChannel};
use crate::queue::{frame_image_channel, rollout_queue, SharedRolloutQueue, SubmitMode};

// =============================================================================
// Test Helpers and Mock Types
// =============================================================================

fn make_rollout(actor: usize, sequence: u64, weight_version: u64, len: usize) -> Rollout {
    let steps = (0..len)
        .map(|t| {
            Step::new(
                vec![TensorBlob::from_slice(&[t as f32], vec![1]).unwrap()],
                vec![TensorBlob::from_slice(&[0i64], vec![1]).unwrap()],
                vec![TensorBlob::zeros(vec![3], DType::F32)],
                1.0,
                false,
            )
        })
        .collect();
    Rollout::new(actor, sequence, weight_version, Vec::new(), steps)
}

fn fill(queue: &SharedRolloutQueue, count: usize, weight_version: u64, len: usize) {
    for i in 0..count {
        queue
            .enqueue(make_rollout(i % 2, i as u64, weight_version, len))
            .unwrap();
    }
}

fn batcher(queue: &SharedRolloutQueue, batch_size: usize) -> DynamicBatcher<Rollout> {
    DynamicBatcher::new(
        queue.clone(),
        BatcherConfig::new(batch_size).with_timeout(Duration::from_millis(10)),
    )
}

/// Counts calls; optionally publishes every step or fails every step.
#[derive(Clone, Default)]
struct MockTrainer {
    calls: Arc<AtomicUsize>,
    publish: bool,
    fail: bool,
}

impl TrainStep<Batch> for MockTrainer {
    fn train(&mut self, batch: Batch) -> Result<TrainOutcome, TrainError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(TrainError("diverged".to_string()));
        }
        let outcome = TrainOutcome::loss(batch.len() as f32);
        if self.publish {
            Ok(outcome.with_weights(vec![n as u8]))
        } else {
            Ok(outcome)
        }
    }
}

struct FrameTrainer;

impl TrainStep<FrameImageBatch> for FrameTrainer {
    fn train(&mut self, batch: FrameImageBatch) -> Result<TrainOutcome, TrainError> {
        assert_eq!(batch.frames().shape()[0], batch.len());
        Ok(TrainOutcome::loss(0.25))
    }
}

fn spawn(
    queue: &SharedRolloutQueue,
    batch_size: usize,
    trainer: MockTrainer,
    weights: SharedWeightChannel,
    config: LearnerConfig,
) -> LearnerHandle {
    Learner::new(config, batcher(queue, batch_size), trainer, weights).spawn()
}

// =============================================================================
// Training and Step Limits
// =============================================================================

#[test]
fn test_trains_until_max_train_steps() {
    let queue = rollout_queue(16, SubmitMode::Blocking);
    let _producer = queue.register_producer(0);
    fill(&queue, 12, 0, 2);

    let trainer = MockTrainer::default();
    let calls = trainer.calls.clone();
    let handle = spawn(
        &queue,
        4,
        trainer,
        weight_channel(),
        LearnerConfig::new("policy").with_max_train_steps(2),
    );
    let stats = handle.join().unwrap();

    assert_eq!(stats.name, "policy");
    assert_eq!(stats.train_steps, 2);
    assert_eq!(stats.items_consumed, 8);
    assert_eq!(stats.frames_consumed, 16);
    assert_eq!(stats.last_loss, 4.0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.len(), 4);
}

#[test]
fn test_periodic_stats_reports() {
    let queue = rollout_queue(16, SubmitMode::Blocking);
    let _producer = queue.register_producer(0);
    fill(&queue, 6, 0, 1);

    let handle = spawn(
        &queue,
        2,
        MockTrainer::default(),
        weight_channel(),
        LearnerConfig::new("policy")
            .with_stats_freq(1)
            .with_max_train_steps(3),
    );
    let rx = handle.stats_rx.clone();
    handle.join().unwrap();

    let reports: Vec<usize> = rx.try_iter().map(|s| s.train_steps).collect();
    assert_eq!(reports, vec![1, 2, 3]);
}

#[test]
fn test_discriminator_learner_trains_on_frame_pairs() {
    let channel = frame_image_channel(8, SubmitMode::Blocking);
    let producer = channel.register_producer(3);
    for seq in 0..4 {
        channel
            .enqueue(FrameImagePair::new(
                3,
                seq,
                TensorBlob::zeros(vec![2, 2, 3], DType::U8),
                TensorBlob::zeros(vec![2, 2, 3], DType::U8),
            ))
            .unwrap();
    }
    drop(producer);

    let batcher = DynamicBatcher::new(
        channel.clone(),
        BatcherConfig::new(2).with_timeout(Duration::from_millis(10)),
    );
    let handle = Learner::new(
        LearnerConfig::new("discriminator").with_stop_when_idle(true),
        batcher,
        FrameTrainer,
        weight_channel(),
    )
    .spawn();
    let stats = handle.join().unwrap();

    assert_eq!(stats.train_steps, 2);
    assert_eq!(stats.items_consumed, 4);
    assert_eq!(stats.frames_consumed, 4);
    assert_eq!(stats.max_staleness, 0);
}

// =============================================================================
// Weight Publishing
// =============================================================================

#[test]
fn test_publishes_weights_and_notifies_sink() {
    let queue = rollout_queue(16, SubmitMode::Blocking);
    let _producer = queue.register_producer(0);
    fill(&queue, 4, 0, 1);

    let weights = weight_channel();
    let published = Arc::new(Mutex::new(Vec::new()));
    let sink_log = published.clone();

    let handle = Learner::new(
        LearnerConfig::new("policy").with_max_train_steps(2),
        batcher(&queue, 2),
        MockTrainer {
            publish: true,
            ..Default::default()
        },
        weights.clone(),
    )
    .with_sink(move |version: u64, blob: &[u8]| sink_log.lock().push((version, blob.to_vec())))
    .spawn();
    let stats = handle.join().unwrap();

    assert_eq!(stats.model_version, 2);
    assert_eq!(weights.version(), 2);
    assert_eq!(weights.latest().blob(), &[2u8][..]);
    assert_eq!(*published.lock(), vec![(1, vec![1u8]), (2, vec![2u8])]);
}

#[test]
fn test_no_publish_without_weights() {
    let queue = rollout_queue(16, SubmitMode::Blocking);
    let _producer = queue.register_producer(0);
    fill(&queue, 2, 0, 1);

    let weights = weight_channel();
    let handle = spawn(
        &queue,
        2,
        MockTrainer::default(),
        weights.clone(),
        LearnerConfig::new("policy").with_max_train_steps(1),
    );
    let stats = handle.join().unwrap();
    assert_eq!(stats.model_version, 0);
    assert_eq!(weights.version(), 0);
}

// =============================================================================
// Staleness
// =============================================================================

#[test]
fn test_staleness_measured_against_current_weights() {
    let queue = rollout_queue(16, SubmitMode::Blocking);
    let _producer = queue.register_producer(0);
    queue.enqueue(make_rollout(0, 0, 1, 1)).unwrap();
    queue.enqueue(make_rollout(1, 0, 3, 1)).unwrap();

    let weights = weight_channel();
    for v in 0..3u8 {
        weights.publish(vec![v]);
    }

    let handle = spawn(
        &queue,
        2,
        MockTrainer::default(),
        weights,
        LearnerConfig::new("policy").with_max_train_steps(1),
    );
    let stats = handle.join().unwrap();

    assert_eq!(stats.max_staleness, 2);
    assert_eq!(stats.last_staleness.max, 2);
    assert!((stats.last_staleness.mean - 1.0).abs() < 1e-9);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_stop_command_while_waiting() {
    let queue = rollout_queue(4, SubmitMode::Blocking);
    let _producer = queue.register_producer(0);
    let handle = spawn(
        &queue,
        2,
        MockTrainer::default(),
        weight_channel(),
        LearnerConfig::new("policy"),
    );
    thread::sleep(Duration::from_millis(30));
    assert!(handle.is_running());

    let stats = handle.stop_and_wait().unwrap();
    assert_eq!(stats.train_steps, 0);
}

#[test]
fn test_request_stats_while_running() {
    let queue = rollout_queue(4, SubmitMode::Blocking);
    let _producer = queue.register_producer(0);
    queue.enqueue(make_rollout(0, 0, 0, 1)).unwrap();

    let handle = spawn(
        &queue,
        2,
        MockTrainer::default(),
        weight_channel(),
        LearnerConfig::new("policy"),
    );
    assert!(handle.request_stats());
    let stats = handle.stats_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(stats.name, "policy");
    assert_eq!(stats.train_steps, 0);
    handle.stop_and_wait().unwrap();
}

#[test]
fn test_exits_when_queue_closed() {
    let queue = rollout_queue(4, SubmitMode::Blocking);
    let _producer = queue.register_producer(0);
    let handle = spawn(
        &queue,
        2,
        MockTrainer::default(),
        weight_channel(),
        LearnerConfig::new("policy"),
    );
    queue.close();
    let stats = handle.join().unwrap();
    assert_eq!(stats.train_steps, 0);
}

#[test]
fn test_stop_when_idle_exits_after_draining() {
    let queue = rollout_queue(8, SubmitMode::Blocking);
    let producer = queue.register_producer(0);
    fill(&queue, 4, 0, 1);
    drop(producer);

    let handle = spawn(
        &queue,
        4,
        MockTrainer::default(),
        weight_channel(),
        LearnerConfig::new("policy").with_stop_when_idle(true),
    );
    let stats = handle.join().unwrap();
    assert_eq!(stats.train_steps, 1);
    assert_eq!(stats.items_consumed, 4);
}

#[test]
fn test_waits_for_returning_producers() {
    let queue = rollout_queue(8, SubmitMode::Blocking);
    drop(queue.register_producer(0));

    let handle = spawn(
        &queue,
        2,
        MockTrainer::default(),
        weight_channel(),
        LearnerConfig::new("policy").with_max_train_steps(1),
    );
    thread::sleep(Duration::from_millis(50));
    assert!(handle.is_running());

    // A reconnecting actor shows up again.
    let _producer = queue.register_producer(0);
    fill(&queue, 2, 0, 1);
    let stats = handle.join().unwrap();
    assert_eq!(stats.train_steps, 1);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_mismatched_batch_is_rejected() {
    let queue = rollout_queue(8, SubmitMode::Blocking);
    let producer = queue.register_producer(0);
    queue.enqueue(make_rollout(0, 0, 0, 2)).unwrap();
    queue.enqueue(make_rollout(1, 0, 0, 3)).unwrap();
    drop(producer);

    let handle = spawn(
        &queue,
        2,
        MockTrainer::default(),
        weight_channel(),
        LearnerConfig::new("policy").with_stop_when_idle(true),
    );
    let stats = handle.join().unwrap();
    assert_eq!(stats.rejected_batches, 1);
    assert_eq!(stats.train_steps, 0);
}

#[test]
fn test_failed_steps_are_counted_and_skipped() {
    let queue = rollout_queue(8, SubmitMode::Blocking);
    let producer = queue.register_producer(0);
    fill(&queue, 4, 0, 1);
    drop(producer);

    let trainer = MockTrainer {
        fail: true,
        ..Default::default()
    };
    let calls = trainer.calls.clone();
    let handle = spawn(
        &queue,
        2,
        trainer,
        weight_channel(),
        LearnerConfig::new("policy").with_stop_when_idle(true),
    );
    let stats = handle.join().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(stats.failed_steps, 2);
    assert_eq!(stats.train_steps, 0);
}
