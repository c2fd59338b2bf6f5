//! Actor system.
//!
//! - `Actor`: steps one environment and talks to the learner over a
//!   `Connection`
//! - `ActorPool`: spawns and joins a group of actors
//! - `FrameForwarder`: per-actor thread sending frame/image pairs

pub mod actor;
pub mod actor_pool;
mod frame_forwarder;

pub use actor::{Actor, ActorConfig, ActorHandle};
pub use actor_pool::{aggregate_stats, ActorPool, ActorPoolConfig};

pub use crate::messages::{ActorMsg, ActorStats};
