//! Batch assembly on the learner side.
//!
//! - `DynamicBatcher`: drains a queue into batches of a target size
//! - `Batch`: rollouts stacked time-major for the policy learner
//! - `FrameImageBatch`: frames and images for the discriminator learner

pub mod batch;
pub mod batcher;

pub use batch::{Batch, BatchError, Batchable, FrameImageBatch, Staleness};
pub use batcher::{BatchMode, BatcherConfig, BatcherStats, DynamicBatcher};
