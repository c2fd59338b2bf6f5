//! Experience records produced by actors.
//!
//! - `Step`: one environment/agent interaction
//! - `Rollout`: a fixed-length run of steps from one actor
//! - `FrameImagePair`: a rendered frame and its reference image, for the
//!   discriminator learner
//!
//! All three are immutable once built. Ownership moves into a queue on
//! enqueue and into a batch on dequeue.

use super::tensor::{TensorBlob, TensorSignature};
use crate::queue::{Produced, ProducerId};
use serde::{Deserialize, Serialize};

/// Identifies an actor. Actors are the producers of both queues.
pub type ActorId = ProducerId;

/// One environment/agent interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Observation the agent acted on.
    pub observation: Vec<TensorBlob>,
    /// Action tensors the agent emitted.
    pub action: Vec<TensorBlob>,
    /// Behaviour policy logits, one tensor per action head.
    pub policy_logits: Vec<TensorBlob>,
    /// Reward received after the action.
    pub reward: f32,
    /// Episode ended after the action.
    pub done: bool,
    /// Behaviour value estimate.
    pub baseline: f32,
    /// Steps taken so far in the current episode, this one included.
    pub episode_step: u32,
    /// Undiscounted return so far in the current episode, this one included.
    pub episode_return: f32,
}

impl Step {
    pub fn new(
        observation: Vec<TensorBlob>,
        action: Vec<TensorBlob>,
        policy_logits: Vec<TensorBlob>,
        reward: f32,
        done: bool,
    ) -> Self {
        Self {
            observation,
            action,
            policy_logits,
            reward,
            done,
            baseline: 0.0,
            episode_step: 0,
            episode_return: 0.0,
        }
    }

    pub fn with_baseline(mut self, baseline: f32) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_episode(mut self, episode_step: u32, episode_return: f32) -> Self {
        self.episode_step = episode_step;
        self.episode_return = episode_return;
        self
    }

    pub fn signature(&self) -> StepSignature {
        StepSignature {
            observation: self.observation.iter().map(TensorBlob::signature).collect(),
            action: self.action.iter().map(TensorBlob::signature).collect(),
            policy_logits: self.policy_logits.iter().map(TensorBlob::signature).collect(),
        }
    }
}

/// Tensor layout of a [`Step`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepSignature {
    pub observation: Vec<TensorSignature>,
    pub action: Vec<TensorSignature>,
    pub policy_logits: Vec<TensorSignature>,
}

impl StepSignature {
    /// Describe the first difference from `other`, if any.
    pub fn diff(&self, other: &StepSignature) -> Option<String> {
        diff_fields("observation", &self.observation, &other.observation)
            .or_else(|| diff_fields("action", &self.action, &other.action))
            .or_else(|| diff_fields("policy_logits", &self.policy_logits, &other.policy_logits))
    }
}

fn diff_fields(name: &str, expected: &[TensorSignature], actual: &[TensorSignature]) -> Option<String> {
    if expected.len() != actual.len() {
        return Some(format!(
            "{} has {} tensors, expected {}",
            name,
            actual.len(),
            expected.len()
        ));
    }
    expected
        .iter()
        .zip(actual)
        .position(|(e, a)| e != a)
        .map(|i| format!("{}[{}] is {}, expected {}", name, i, actual[i], expected[i]))
}

/// A fixed-length sequence of steps from one actor.
///
/// Tagged with the weight version that was loaded when collection started,
/// so the learner can measure staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    actor_id: ActorId,
    sequence: u64,
    weight_version: u64,
    initial_agent_state: Vec<TensorBlob>,
    steps: Vec<Step>,
}

impl Rollout {
    pub fn new(
        actor_id: ActorId,
        sequence: u64,
        weight_version: u64,
        initial_agent_state: Vec<TensorBlob>,
        steps: Vec<Step>,
    ) -> Self {
        Self {
            actor_id,
            sequence,
            weight_version,
            initial_agent_state,
            steps,
        }
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    /// Position of this rollout among its actor's submissions.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn weight_version(&self) -> u64 {
        self.weight_version
    }

    /// Recurrent state the policy held before the first step.
    pub fn initial_agent_state(&self) -> &[TensorBlob] {
        &self.initial_agent_state
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of weight versions published since this rollout's policy.
    pub fn staleness(&self, current_version: u64) -> u64 {
        current_version.saturating_sub(self.weight_version)
    }

    pub fn signature(&self) -> RolloutSignature {
        RolloutSignature {
            len: self.steps.len(),
            agent_state: self
                .initial_agent_state
                .iter()
                .map(TensorBlob::signature)
                .collect(),
            step: self.steps.first().map(Step::signature),
        }
    }
}

impl Produced for Rollout {
    fn producer(&self) -> ProducerId {
        self.actor_id
    }
}

/// Layout shared by every rollout in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutSignature {
    pub len: usize,
    pub agent_state: Vec<TensorSignature>,
    /// `None` only for an empty rollout.
    pub step: Option<StepSignature>,
}

impl RolloutSignature {
    /// Describe how `rollout` deviates from this layout, checking every step.
    pub fn mismatch(&self, rollout: &Rollout) -> Option<String> {
        if rollout.len() != self.len {
            return Some(format!("{} steps, expected {}", rollout.len(), self.len));
        }
        let agent_state: Vec<_> = rollout
            .initial_agent_state
            .iter()
            .map(TensorBlob::signature)
            .collect();
        if let Some(d) = diff_fields("agent_state", &self.agent_state, &agent_state) {
            return Some(d);
        }
        let expected = self.step.as_ref()?;
        rollout
            .steps
            .iter()
            .enumerate()
            .find_map(|(t, step)| expected.diff(&step.signature()).map(|d| format!("step {}: {}", t, d)))
    }
}

/// A rendered frame paired with the reference image it should match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameImagePair {
    actor_id: ActorId,
    sequence: u64,
    frame: TensorBlob,
    image: TensorBlob,
}

impl FrameImagePair {
    pub fn new(actor_id: ActorId, sequence: u64, frame: TensorBlob, image: TensorBlob) -> Self {
        Self {
            actor_id,
            sequence,
            frame,
            image,
        }
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn frame(&self) -> &TensorBlob {
        &self.frame
    }

    pub fn image(&self) -> &TensorBlob {
        &self.image
    }

    pub fn into_parts(self) -> (TensorBlob, TensorBlob) {
        (self.frame, self.image)
    }
}

impl Produced for FrameImagePair {
    fn producer(&self) -> ProducerId {
        self.actor_id
    }
}
