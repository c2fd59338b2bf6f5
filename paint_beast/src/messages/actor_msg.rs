//! Messages for actor threads.
//!
//! # Data Integrity
//!
//! Episode returns that are not finite (NaN, Inf) are counted but kept out
//! of the running average.

/// Commands sent to an actor thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorMsg {
    /// Finish the current step and exit.
    Stop,
    /// Send a stats snapshot on the stats channel.
    RequestStats,
}

/// Statistics reported by an actor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActorStats {
    pub actor_id: usize,

    /// Environment steps taken.
    pub steps: usize,

    /// Episodes completed (including those with non-finite returns).
    pub episodes: usize,

    /// Episodes whose return entered the average.
    pub valid_episodes: usize,

    /// Episodes with a NaN/Inf return.
    pub filtered_episodes: usize,

    /// Mean episode return over valid episodes.
    pub avg_episode_return: f32,

    /// Most recent episode return, finite or not.
    pub recent_episode_return: f32,

    /// Rollouts acknowledged by the learner.
    pub rollouts_submitted: usize,

    /// Partial rollouts thrown away after a connection loss.
    pub rollouts_discarded: usize,

    /// Complete rollouts refused by a full non-blocking queue.
    pub rollouts_dropped: usize,

    /// Frame/image pairs acknowledged by the learner.
    pub frame_pairs_submitted: usize,

    /// Frame/image pairs shed because the frame path was backed up or gone.
    pub frame_pairs_dropped: usize,

    /// Successful reconnects after a lost connection.
    pub reconnects: usize,

    /// Weight version currently loaded in the policy.
    pub weight_version: u64,
}

impl ActorStats {
    pub fn new(actor_id: usize) -> Self {
        Self {
            actor_id,
            ..Default::default()
        }
    }

    /// Update stats after episode completion.
    ///
    /// Welford's incremental mean; non-finite returns are only counted.
    pub fn record_episode(&mut self, episode_return: f32) {
        self.episodes += 1;
        self.recent_episode_return = episode_return;

        if !episode_return.is_finite() {
            self.filtered_episodes += 1;
            return;
        }

        self.valid_episodes += 1;
        let delta = episode_return - self.avg_episode_return;
        self.avg_episode_return += delta / self.valid_episodes as f32;
    }

    pub fn add_steps(&mut self, n: usize) {
        self.steps = self.steps.saturating_add(n);
    }

    pub fn has_filtered_episodes(&self) -> bool {
        self.filtered_episodes > 0
    }

    /// Fraction of episodes whose return was not finite.
    pub fn filtered_fraction(&self) -> f32 {
        if self.episodes == 0 {
            0.0
        } else {
            self.filtered_episodes as f32 / self.episodes as f32
        }
    }
}
