//! Messages for learner threads.

use crate::batching::Staleness;

/// Commands sent to a learner thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnerMsg {
    /// Finish the current step and exit.
    Stop,
    /// Send a stats snapshot on the stats channel.
    RequestStats,
}

/// Statistics reported by a learner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearnerStats {
    /// Learner name, e.g. `"policy"` or `"discriminator"`.
    pub name: String,

    /// Training steps completed.
    pub train_steps: usize,

    /// Items (rollouts or frame pairs) trained on.
    pub items_consumed: usize,

    /// Environment steps trained on (rollout length × rollouts).
    pub frames_consumed: usize,

    /// Batches dropped for inconsistent layout.
    pub rejected_batches: usize,

    /// Training steps that failed.
    pub failed_steps: usize,

    /// Most recent loss.
    pub last_loss: f32,

    /// Running mean of finite losses.
    pub avg_loss: f32,

    valid_losses: usize,

    /// Environment steps per second since the learner started.
    pub steps_per_second: f32,

    /// Latest published weight version.
    pub model_version: u64,

    /// Items waiting in the queue at the last report.
    pub queue_len: usize,

    /// Queue fill fraction at the last report.
    pub queue_utilization: f32,

    /// Weight lag of the last batch.
    pub last_staleness: Staleness,

    /// Largest weight lag seen in any batch.
    pub max_staleness: u64,
}

impl LearnerStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Record one finished training step.
    pub fn record_step(&mut self, items: usize, frames: usize, loss: f32) {
        self.train_steps += 1;
        self.items_consumed += items;
        self.frames_consumed += frames;
        self.last_loss = loss;

        if loss.is_finite() {
            self.valid_losses += 1;
            self.avg_loss += (loss - self.avg_loss) / self.valid_losses as f32;
        }
    }

    pub fn record_staleness(&mut self, staleness: Staleness) {
        self.last_staleness = staleness;
        self.max_staleness = self.max_staleness.max(staleness.max);
    }

    pub fn set_model_version(&mut self, version: u64) {
        self.model_version = version;
    }

    pub fn set_queue(&mut self, len: usize, utilization: f32) {
        self.queue_len = len;
        self.queue_utilization = utilization;
    }

    pub fn set_steps_per_second(&mut self, sps: f32) {
        self.steps_per_second = sps;
    }
}
