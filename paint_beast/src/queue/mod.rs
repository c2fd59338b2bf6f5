//! Bounded queues between actors and learners.
//!
//! - `RolloutQueue`: completed rollouts for the policy learner
//! - `FrameImageChannel`: frame/image pairs for the discriminator learner
//!
//! Both are instances of [`BoundedQueue`] and share no lock or storage.

pub mod bounded_queue;

pub use bounded_queue::{
    BoundedQueue, ProducerGuard, ProducerId, Produced, QueueError, QueueStats, SubmitMode,
};

use crate::core::step::{FrameImagePair, Rollout};
use std::sync::Arc;

/// Queue of completed rollouts.
pub type RolloutQueue = BoundedQueue<Rollout>;

/// Queue of rendered frames and their reference images.
pub type FrameImageChannel = BoundedQueue<FrameImagePair>;

pub type SharedRolloutQueue = Arc<RolloutQueue>;
pub type SharedFrameImageChannel = Arc<FrameImageChannel>;

/// Create a shared rollout queue.
pub fn rollout_queue(capacity: usize, mode: SubmitMode) -> SharedRolloutQueue {
    Arc::new(RolloutQueue::new(capacity, mode))
}

/// Create a shared frame/image channel.
pub fn frame_image_channel(capacity: usize, mode: SubmitMode) -> SharedFrameImageChannel {
    Arc::new(FrameImageChannel::new(capacity, mode))
}

#[cfg(test)]
mod tests;
