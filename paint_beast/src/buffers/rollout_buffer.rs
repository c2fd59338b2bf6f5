//! Per-actor rollout accumulator.
//!
//! Key characteristics:
//! - Owned by a single actor thread, no locking
//! - Emits a `Rollout` every `length` steps, never a partial one
//! - Tags each rollout with the weight version it was collected under

use crate::core::step::{ActorId, Rollout, Step};
use crate::core::tensor::TensorBlob;

/// Collects steps until a complete rollout is ready.
#[derive(Debug)]
pub struct RolloutBuffer {
    actor_id: ActorId,
    length: usize,
    next_sequence: u64,
    weight_version: u64,
    initial_agent_state: Vec<TensorBlob>,
    steps: Vec<Step>,
}

impl RolloutBuffer {
    /// Buffer for `actor_id` producing rollouts of `length` steps (minimum 1).
    pub fn new(actor_id: ActorId, length: usize) -> Self {
        let length = length.max(1);
        Self {
            actor_id,
            length,
            next_sequence: 0,
            weight_version: 0,
            initial_agent_state: Vec::new(),
            steps: Vec::with_capacity(length),
        }
    }

    /// Start a rollout under `weight_version` with the policy's current state.
    ///
    /// Any partially collected steps are dropped.
    pub fn begin(&mut self, weight_version: u64, initial_agent_state: Vec<TensorBlob>) {
        self.steps.clear();
        self.weight_version = weight_version;
        self.initial_agent_state = initial_agent_state;
    }

    /// Append a step. Returns the finished rollout on the `length`-th step.
    ///
    /// The next rollout keeps the same weight version and an empty agent
    /// state until [`begin`](Self::begin) is called again.
    pub fn push(&mut self, step: Step) -> Option<Rollout> {
        self.steps.push(step);
        if self.steps.len() < self.length {
            return None;
        }

        let steps = std::mem::replace(&mut self.steps, Vec::with_capacity(self.length));
        let rollout = Rollout::new(
            self.actor_id,
            self.next_sequence,
            self.weight_version,
            std::mem::take(&mut self.initial_agent_state),
            steps,
        );
        self.next_sequence += 1;
        Some(rollout)
    }

    /// Drop the partial rollout. Returns how many steps were discarded.
    pub fn discard(&mut self) -> usize {
        let dropped = self.steps.len();
        self.steps.clear();
        self.initial_agent_state.clear();
        dropped
    }

    /// Steps collected toward the current rollout.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    pub fn weight_version(&self) -> u64 {
        self.weight_version
    }

    /// Sequence number the next completed rollout will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }
}
