//! Collaborators an actor drives: the painting environment and the policy.
//!
//! Both are supplied by the user. The substrate only moves the tensors they
//! produce and never interprets them.

use crate::core::tensor::{TensorBlob, TensorError};

/// Result of one environment step.
#[derive(Debug, Clone)]
pub struct EnvStep {
    /// Observation after the action.
    pub observation: Vec<TensorBlob>,
    /// Reward for the action.
    pub reward: f32,
    /// Episode ended on its own (painting finished).
    pub terminal: bool,
    /// Episode cut off by a step limit.
    pub truncated: bool,
}

impl EnvStep {
    pub fn new(observation: Vec<TensorBlob>, reward: f32, terminal: bool, truncated: bool) -> Self {
        Self {
            observation,
            reward,
            terminal,
            truncated,
        }
    }

    /// Terminal or truncated.
    pub fn done(&self) -> bool {
        self.terminal || self.truncated
    }
}

/// A painting simulator.
pub trait PaintEnvironment: Send {
    /// Start a new episode and return its first observation.
    fn reset(&mut self) -> Vec<TensorBlob>;

    /// Apply one action.
    fn step(&mut self, action: &[TensorBlob]) -> EnvStep;

    /// The canvas as currently painted.
    fn frame(&self) -> TensorBlob;

    /// The reference image the canvas should match.
    fn target_image(&self) -> TensorBlob;
}

/// Everything the policy emits for one observation.
#[derive(Debug, Clone)]
pub struct PolicyOutput {
    pub action: Vec<TensorBlob>,
    pub policy_logits: Vec<TensorBlob>,
    /// Value estimate for the observation.
    pub baseline: f32,
    /// Recurrent state to pass to the next `act` call.
    pub agent_state: Vec<TensorBlob>,
}

/// The actor-side copy of the agent.
pub trait Policy: Send {
    /// Recurrent state at the start of an episode. Empty for feed-forward
    /// policies.
    fn initial_state(&self) -> Vec<TensorBlob>;

    fn act(&mut self, observation: &[TensorBlob], agent_state: &[TensorBlob]) -> PolicyOutput;

    /// Replace parameters with a published weight blob.
    fn load_weights(&mut self, blob: &[u8]) -> Result<(), TensorError>;
}
