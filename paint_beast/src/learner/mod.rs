//! Learner system.
//!
//! - `Learner`: drains one queue through a `DynamicBatcher` into a
//!   `TrainStep` and publishes the weights it produces
//!
//! The policy learner (rollouts) and the discriminator learner (frame/image
//! pairs) are two independent `Learner`s over different queues.

pub mod learner;

#[cfg(test)]
mod tests;

pub use learner::{
    Learner, LearnerConfig, LearnerHandle, SnapshotSink, TrainBatch, TrainError, TrainOutcome,
    TrainStep,
};

// Re-export from messages for convenience
pub use crate::messages::{LearnerMsg, LearnerStats};
