//! Learner-side batches.
//!
//! A batch is only built from items with identical layout. Any deviation is
//! reported as [`BatchError::ShapeMismatch`] and the batch is dropped.

use crate::core::step::{ActorId, FrameImagePair, Rollout, RolloutSignature, Step};
use crate::core::tensor::{TensorBlob, TensorError, TensorSignature};
use crate::queue::{Produced, QueueError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Item `index` of the batch does not match the layout of item 0.
    #[error("item {index} from actor {actor_id} does not match the batch layout: {detail}")]
    ShapeMismatch {
        index: usize,
        actor_id: ActorId,
        detail: String,
    },

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error("cannot assemble an empty batch")]
    Empty,
}

impl BatchError {
    /// The queue will never deliver more items.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchError::Queue(QueueError::NoMoreProducers) | BatchError::Queue(QueueError::Closed)
        )
    }
}

/// Queue items that can be combined into a batch.
pub trait Batchable: Produced + Sized {
    type Batch: Send;

    fn assemble(items: Vec<Self>) -> Result<Self::Batch, BatchError>;
}

/// Mean and max weight-version lag of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Staleness {
    pub mean: f64,
    pub max: u64,
}

/// Rollouts with identical step count and tensor layout.
#[derive(Debug, Clone)]
pub struct Batch {
    rollouts: Vec<Rollout>,
    signature: RolloutSignature,
}

impl Batch {
    pub fn from_rollouts(rollouts: Vec<Rollout>) -> Result<Self, BatchError> {
        let signature = rollouts.first().ok_or(BatchError::Empty)?.signature();
        for (index, rollout) in rollouts.iter().enumerate().skip(1) {
            if let Some(detail) = signature.mismatch(rollout) {
                return Err(BatchError::ShapeMismatch {
                    index,
                    actor_id: rollout.actor_id(),
                    detail,
                });
            }
        }
        Ok(Self {
            rollouts,
            signature,
        })
    }

    /// Number of rollouts (B).
    pub fn len(&self) -> usize {
        self.rollouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rollouts.is_empty()
    }

    /// Steps per rollout (T).
    pub fn unroll_length(&self) -> usize {
        self.signature.len
    }

    pub fn signature(&self) -> &RolloutSignature {
        &self.signature
    }

    pub fn rollouts(&self) -> &[Rollout] {
        &self.rollouts
    }

    pub fn into_rollouts(self) -> Vec<Rollout> {
        self.rollouts
    }

    pub fn actor_ids(&self) -> Vec<ActorId> {
        self.rollouts.iter().map(Rollout::actor_id).collect()
    }

    /// Total steps across the batch (T * B).
    pub fn num_steps(&self) -> usize {
        self.len() * self.unroll_length()
    }

    /// Weight-version lag of the batch relative to `current_version`.
    pub fn staleness(&self, current_version: u64) -> Staleness {
        if self.rollouts.is_empty() {
            return Staleness::default();
        }
        let lags: Vec<u64> = self
            .rollouts
            .iter()
            .map(|r| r.staleness(current_version))
            .collect();
        Staleness {
            mean: lags.iter().sum::<u64>() as f64 / lags.len() as f64,
            max: lags.iter().copied().max().unwrap_or(0),
        }
    }

    /// Observation tensor `index` stacked time-major: `[T, B, ...]`.
    pub fn observation(&self, index: usize) -> Result<TensorBlob, BatchError> {
        self.stack_steps("observation", |s| s.observation.get(index), index)
    }

    /// Action tensor `index` stacked time-major: `[T, B, ...]`.
    pub fn action(&self, index: usize) -> Result<TensorBlob, BatchError> {
        self.stack_steps("action", |s| s.action.get(index), index)
    }

    /// Policy-logit tensor `index` stacked time-major: `[T, B, ...]`.
    pub fn policy_logits(&self, index: usize) -> Result<TensorBlob, BatchError> {
        self.stack_steps("policy_logits", |s| s.policy_logits.get(index), index)
    }

    /// Rewards as `[T, B]` f32.
    pub fn rewards(&self) -> Result<TensorBlob, BatchError> {
        self.scalar_grid(|s| s.reward)
    }

    /// Behaviour value estimates as `[T, B]` f32.
    pub fn baselines(&self) -> Result<TensorBlob, BatchError> {
        self.scalar_grid(|s| s.baseline)
    }

    /// Episode-end flags as `[T, B]` bool.
    pub fn dones(&self) -> Result<TensorBlob, BatchError> {
        let values: Vec<bool> = self.time_major().map(|s| s.done).collect();
        Ok(TensorBlob::from_bools(&values, self.grid_shape())?)
    }

    /// Initial agent-state tensor `index` stacked batch-major: `[B, ...]`.
    pub fn initial_agent_state(&self, index: usize) -> Result<TensorBlob, BatchError> {
        let parts = self
            .rollouts
            .iter()
            .map(|r| {
                r.initial_agent_state().get(index).ok_or(TensorError::MissingField {
                    field: "agent_state",
                    index,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TensorBlob::stack(&parts)?)
    }

    fn grid_shape(&self) -> Vec<usize> {
        vec![self.unroll_length(), self.len()]
    }

    /// Steps ordered t-major: all rollouts at t=0, then t=1, ...
    fn time_major(&self) -> impl Iterator<Item = &Step> + '_ {
        (0..self.unroll_length()).flat_map(move |t| self.rollouts.iter().map(move |r| &r.steps()[t]))
    }

    fn scalar_grid(&self, field: impl Fn(&Step) -> f32) -> Result<TensorBlob, BatchError> {
        let values: Vec<f32> = self.time_major().map(field).collect();
        Ok(TensorBlob::from_slice(&values, self.grid_shape())?)
    }

    fn stack_steps<'a>(
        &'a self,
        field: &'static str,
        get: impl Fn(&'a Step) -> Option<&'a TensorBlob>,
        index: usize,
    ) -> Result<TensorBlob, BatchError> {
        let parts = self
            .time_major()
            .map(|s| get(s).ok_or(TensorError::MissingField { field, index }))
            .collect::<Result<Vec<_>, _>>()?;
        let stacked = TensorBlob::stack(&parts)?;

        let mut shape = self.grid_shape();
        shape.extend_from_slice(&stacked.shape()[1..]);
        Ok(stacked.reshape(shape)?)
    }
}

impl Batchable for Rollout {
    type Batch = Batch;

    fn assemble(items: Vec<Self>) -> Result<Batch, BatchError> {
        Batch::from_rollouts(items)
    }
}

/// Frames and reference images stacked batch-major for the discriminator.
#[derive(Debug, Clone)]
pub struct FrameImageBatch {
    actor_ids: Vec<ActorId>,
    frames: TensorBlob,
    images: TensorBlob,
}

impl FrameImageBatch {
    pub fn from_pairs(pairs: Vec<FrameImagePair>) -> Result<Self, BatchError> {
        let first = pairs.first().ok_or(BatchError::Empty)?;
        let frame_sig = first.frame().signature();
        let image_sig = first.image().signature();

        for (index, pair) in pairs.iter().enumerate().skip(1) {
            let detail = mismatch("frame", &frame_sig, pair.frame())
                .or_else(|| mismatch("image", &image_sig, pair.image()));
            if let Some(detail) = detail {
                return Err(BatchError::ShapeMismatch {
                    index,
                    actor_id: pair.actor_id(),
                    detail,
                });
            }
        }

        let actor_ids = pairs.iter().map(FrameImagePair::actor_id).collect();
        let frames = TensorBlob::stack(&pairs.iter().map(FrameImagePair::frame).collect::<Vec<_>>())?;
        let images = TensorBlob::stack(&pairs.iter().map(FrameImagePair::image).collect::<Vec<_>>())?;
        Ok(Self {
            actor_ids,
            frames,
            images,
        })
    }

    pub fn len(&self) -> usize {
        self.actor_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actor_ids.is_empty()
    }

    pub fn actor_ids(&self) -> &[ActorId] {
        &self.actor_ids
    }

    /// `[B, ...]`
    pub fn frames(&self) -> &TensorBlob {
        &self.frames
    }

    /// `[B, ...]`
    pub fn images(&self) -> &TensorBlob {
        &self.images
    }

    pub fn into_parts(self) -> (TensorBlob, TensorBlob) {
        (self.frames, self.images)
    }
}

fn mismatch(field: &str, expected: &TensorSignature, actual: &TensorBlob) -> Option<String> {
    let actual = actual.signature();
    (actual != *expected).then(|| format!("{} is {}, expected {}", field, actual, expected))
}

impl Batchable for FrameImagePair {
    type Batch = FrameImageBatch;

    fn assemble(items: Vec<Self>) -> Result<FrameImageBatch, BatchError> {
        FrameImageBatch::from_pairs(items)
    }
}
