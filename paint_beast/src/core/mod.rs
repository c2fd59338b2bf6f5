//! Core data types shared by actors and learners.

pub mod burn_interop;
pub mod step;
pub mod tensor;
pub mod weights;

pub use step::{ActorId, FrameImagePair, Rollout, RolloutSignature, Step, StepSignature};
pub use tensor::{DType, Element, TensorBlob, TensorError, TensorSignature};
pub use weights::{
    weight_channel, weight_channel_with, SharedWeightChannel, VersionTracker, WeightChannel,
    WeightSnapshot, WeightSubscriber,
};
