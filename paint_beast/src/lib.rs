//! # paint_beast: actor/learner plumbing for painting agents
//!
//! Actors step painting environments and stream fixed-length rollouts to a
//! policy learner and finished-canvas/target pairs to a discriminator
//! learner. The learner side batches what arrives and broadcasts new
//! weights back.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Thread 1          Thread 2          Thread N                        │
//! │  ┌────────┐        ┌────────┐        ┌────────┐                      │
//! │  │Actor 0 │        │Actor 1 │        │Actor N │                      │
//! │  │ env    │        │ env    │        │ env    │                      │
//! │  │ policy │        │ policy │        │ policy │                      │
//! │  └───┬────┘        └───┬────┘        └───┬────┘                      │
//! │      └───── Connection (3 lanes each) ───┘                           │
//! │                        ▼                                             │
//! │              ┌─────────────────┐                                     │
//! │              │  LearnerServer  │◄──── PullWeights ── WeightChannel   │
//! │              └───┬─────────┬───┘                           ▲         │
//! │                  ▼         ▼                               │         │
//! │       RolloutQueue         FrameImageChannel               │         │
//! │            ▼                     ▼                         │         │
//! │     DynamicBatcher         DynamicBatcher                  │         │
//! │            ▼                     ▼                         │         │
//! │     policy Learner ────────────────────────── publish ─────┘         │
//! │                        discriminator Learner                         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use paint_beast::{BeastConfig, Runtime};
//!
//! let config = BeastConfig::new()
//!     .with_num_actors(4)
//!     .with_batch_size(32)
//!     .with_rollout_length(20);
//!
//! let runtime = Runtime::builder(config)
//!     .with_initial_weights(initial_blob)
//!     .start(env_factory, policy_factory, policy_train, discriminator_train)?;
//! runtime.wait_for_actors(Duration::from_secs(600));
//! let report = runtime.shutdown();
//! ```

pub mod core;
pub mod queue;
pub mod batching;
pub mod buffers;
pub mod transport;
pub mod messages;
pub mod actors;
pub mod learner;
pub mod environment;
pub mod config;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use core::step::{ActorId, FrameImagePair, Rollout, RolloutSignature, Step, StepSignature};
pub use core::tensor::{DType, Element, TensorBlob, TensorError, TensorSignature};
pub use core::weights::{
    weight_channel, weight_channel_with, SharedWeightChannel, VersionTracker, WeightChannel,
    WeightSnapshot, WeightSubscriber,
};

pub use queue::{
    frame_image_channel, rollout_queue, BoundedQueue, FrameImageChannel, ProducerGuard, ProducerId,
    QueueError, QueueStats, RolloutQueue, SubmitMode,
};
pub use batching::{Batch, BatchError, BatchMode, BatcherConfig, DynamicBatcher, FrameImageBatch, Staleness};
pub use buffers::RolloutBuffer;
pub use transport::{
    Connection, Connector, FrameSender, LearnerServer, ReconnectPolicy, TransportConfig, TransportError,
};

// Message types between threads and their owners
pub use messages::{ActorMsg, ActorStats, LearnerMsg, LearnerStats};

pub use actors::{Actor, ActorConfig, ActorHandle, ActorPool, ActorPoolConfig};
pub use learner::{Learner, LearnerConfig, LearnerHandle, SnapshotSink, TrainError, TrainOutcome, TrainStep};

// Environment and policy seams
pub use environment::{EnvStep, PaintEnvironment, Policy, PolicyOutput};

pub use config::{BeastConfig, ConfigError};
pub use runtime::{Runtime, RuntimeBuilder, RuntimeReport};
