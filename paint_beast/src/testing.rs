//! Deterministic environment and policy used by the crate's tests.

use crate::core::tensor::{DType, TensorBlob, TensorError};
use crate::environment::{EnvStep, PaintEnvironment, Policy, PolicyOutput};
use parking_lot::Mutex;
use std::sync::Arc;

/// Episodes of fixed length; the observation is the step index.
pub struct CountingEnv {
    episode_length: usize,
    t: usize,
    canvas_side: usize,
}

impl CountingEnv {
    pub fn new(episode_length: usize) -> Self {
        Self {
            episode_length: episode_length.max(1),
            t: 0,
            canvas_side: 4,
        }
    }
}

impl PaintEnvironment for CountingEnv {
    fn reset(&mut self) -> Vec<TensorBlob> {
        self.t = 0;
        vec![TensorBlob::from_slice(&[0.0f32], vec![1]).unwrap()]
    }

    fn step(&mut self, _action: &[TensorBlob]) -> EnvStep {
        self.t += 1;
        let observation = TensorBlob::from_slice(&[self.t as f32], vec![1]).unwrap();
        EnvStep::new(vec![observation], 1.0, self.t >= self.episode_length, false)
    }

    fn frame(&self) -> TensorBlob {
        TensorBlob::zeros(vec![self.canvas_side, self.canvas_side, 3], DType::U8)
    }

    fn target_image(&self) -> TensorBlob {
        TensorBlob::zeros(vec![self.canvas_side, self.canvas_side, 3], DType::U8)
    }
}

/// Fixed action; remembers every weight blob it was given.
#[derive(Clone, Default)]
pub struct RecordingPolicy {
    pub loaded: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded(&self) -> Vec<Vec<u8>> {
        self.loaded.lock().clone()
    }
}

impl Policy for RecordingPolicy {
    fn initial_state(&self) -> Vec<TensorBlob> {
        vec![TensorBlob::zeros(vec![2], DType::F32)]
    }

    fn act(&mut self, _observation: &[TensorBlob], agent_state: &[TensorBlob]) -> PolicyOutput {
        PolicyOutput {
            action: vec![TensorBlob::from_slice(&[0i64], vec![1]).unwrap()],
            policy_logits: vec![TensorBlob::zeros(vec![3], DType::F32)],
            baseline: 0.0,
            agent_state: agent_state.to_vec(),
        }
    }

    fn load_weights(&mut self, blob: &[u8]) -> Result<(), TensorError> {
        self.loaded.lock().push(blob.to_vec());
        Ok(())
    }
}
