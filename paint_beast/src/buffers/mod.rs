//! Actor-side experience buffering.
//!
//! - `RolloutBuffer`: assembles fixed-length rollouts from single steps

pub mod rollout_buffer;

pub use rollout_buffer::RolloutBuffer;
