//! Runtime configuration.
//!
//! One serde-friendly struct covers the whole actor/learner setup; the
//! per-component configs are derived from it.

use crate::actors::ActorPoolConfig;
use crate::batching::{BatchMode, BatcherConfig};
use crate::learner::LearnerConfig;
use crate::queue::SubmitMode;
use crate::transport::{ReconnectPolicy, TransportConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A count parameter (num_actors, batch_size, etc.) must be positive.
    #[error("{field} must be > 0, got {value}")]
    InvalidCount { field: &'static str, value: u64 },

    /// A queue cannot hold one full batch.
    #[error("{queue} capacity ({capacity}) must be >= its batch size ({batch_size})")]
    CapacityTooSmall {
        queue: &'static str,
        capacity: usize,
        batch_size: usize,
    },

    #[error("invalid reconnect policy: {0}")]
    Reconnect(&'static str),
}

/// Configuration for the actor/learner runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeastConfig {
    /// Number of actor threads
    pub num_actors: usize,
    /// Rollouts per policy batch
    pub batch_size: usize,
    /// Steps per rollout (unroll length)
    pub rollout_length: usize,
    /// Frame/image pairs per discriminator batch (None = `batch_size`)
    pub frame_batch_size: Option<usize>,
    /// Rollout queue capacity (None = `max(batch_size, 2 * num_actors)`)
    pub rollout_queue_capacity: Option<usize>,
    /// Frame channel capacity (None = `max(frame_batch_size, 2 * num_actors)`)
    pub frame_queue_capacity: Option<usize>,
    pub batch_mode: BatchMode,
    pub submit_mode: SubmitMode,
    /// Longest single batcher wait.
    pub batch_timeout_ms: u64,
    /// Longest wait for a weights pull.
    pub call_timeout_ms: u64,
    /// Rollouts between weight pulls.
    pub weight_sync_interval: usize,
    /// Send a frame/image pair at the end of every episode.
    pub emit_frames: bool,
    /// Frame/image pairs an actor holds for the frame lane before shedding.
    pub frame_buffer: usize,
    /// Per-actor rollout limit (0 = unlimited)
    pub max_rollouts_per_actor: usize,
    /// Policy learner step limit (0 = unlimited)
    pub max_train_steps: usize,
    /// Learner stats reporting frequency (in train steps)
    pub stats_freq: usize,
    /// Progress log interval.
    pub log_interval_ms: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for BeastConfig {
    fn default() -> Self {
        Self {
            num_actors: 4,
            batch_size: 64,
            rollout_length: 20,
            frame_batch_size: None,
            rollout_queue_capacity: None,
            frame_queue_capacity: None,
            batch_mode: BatchMode::Strict,
            submit_mode: SubmitMode::Blocking,
            batch_timeout_ms: 100,
            call_timeout_ms: 1_000,
            weight_sync_interval: 1,
            emit_frames: true,
            frame_buffer: 4,
            max_rollouts_per_actor: 0,
            max_train_steps: 0,
            stats_freq: 100,
            log_interval_ms: 5_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl BeastConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_actors(mut self, n: usize) -> Self {
        self.num_actors = n;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_rollout_length(mut self, length: usize) -> Self {
        self.rollout_length = length;
        self
    }

    pub fn with_frame_batch_size(mut self, size: usize) -> Self {
        self.frame_batch_size = Some(size);
        self
    }

    pub fn with_rollout_queue_capacity(mut self, capacity: usize) -> Self {
        self.rollout_queue_capacity = Some(capacity);
        self
    }

    pub fn with_frame_queue_capacity(mut self, capacity: usize) -> Self {
        self.frame_queue_capacity = Some(capacity);
        self
    }

    pub fn with_batch_mode(mut self, mode: BatchMode) -> Self {
        self.batch_mode = mode;
        self
    }

    pub fn with_submit_mode(mut self, mode: SubmitMode) -> Self {
        self.submit_mode = mode;
        self
    }

    pub fn with_batch_timeout_ms(mut self, ms: u64) -> Self {
        self.batch_timeout_ms = ms;
        self
    }

    pub fn with_call_timeout_ms(mut self, ms: u64) -> Self {
        self.call_timeout_ms = ms;
        self
    }

    pub fn with_weight_sync_interval(mut self, rollouts: usize) -> Self {
        self.weight_sync_interval = rollouts;
        self
    }

    pub fn with_emit_frames(mut self, emit: bool) -> Self {
        self.emit_frames = emit;
        self
    }

    pub fn with_frame_buffer(mut self, pairs: usize) -> Self {
        self.frame_buffer = pairs;
        self
    }

    pub fn with_max_rollouts_per_actor(mut self, rollouts: usize) -> Self {
        self.max_rollouts_per_actor = rollouts;
        self
    }

    pub fn with_max_train_steps(mut self, steps: usize) -> Self {
        self.max_train_steps = steps;
        self
    }

    pub fn with_log_interval_ms(mut self, ms: u64) -> Self {
        self.log_interval_ms = ms;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn frame_batch_size(&self) -> usize {
        self.frame_batch_size.unwrap_or(self.batch_size)
    }

    pub fn rollout_queue_capacity(&self) -> usize {
        self.rollout_queue_capacity
            .unwrap_or_else(|| self.batch_size.max(2 * self.num_actors))
    }

    pub fn frame_queue_capacity(&self) -> usize {
        self.frame_queue_capacity
            .unwrap_or_else(|| self.frame_batch_size().max(2 * self.num_actors))
    }

    /// Validate all configuration parameters.
    ///
    /// # Validation Rules
    /// - Counts and timeouts must be > 0
    /// - Each queue must hold at least one full batch
    /// - The reconnect policy must be valid
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts: [(&'static str, u64); 9] = [
            ("num_actors", self.num_actors as u64),
            ("batch_size", self.batch_size as u64),
            ("rollout_length", self.rollout_length as u64),
            ("frame_batch_size", self.frame_batch_size() as u64),
            ("weight_sync_interval", self.weight_sync_interval as u64),
            ("frame_buffer", self.frame_buffer as u64),
            ("stats_freq", self.stats_freq as u64),
            ("batch_timeout_ms", self.batch_timeout_ms),
            ("call_timeout_ms", self.call_timeout_ms),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::InvalidCount { field, value });
            }
        }

        if self.rollout_queue_capacity() < self.batch_size {
            return Err(ConfigError::CapacityTooSmall {
                queue: "rollout queue",
                capacity: self.rollout_queue_capacity(),
                batch_size: self.batch_size,
            });
        }
        if self.frame_queue_capacity() < self.frame_batch_size() {
            return Err(ConfigError::CapacityTooSmall {
                queue: "frame channel",
                capacity: self.frame_queue_capacity(),
                batch_size: self.frame_batch_size(),
            });
        }

        self.reconnect.validate().map_err(ConfigError::Reconnect)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn policy_batcher_config(&self) -> BatcherConfig {
        BatcherConfig::new(self.batch_size)
            .with_mode(self.batch_mode)
            .with_timeout(self.batch_timeout())
    }

    pub fn frame_batcher_config(&self) -> BatcherConfig {
        BatcherConfig::new(self.frame_batch_size())
            .with_mode(self.batch_mode)
            .with_timeout(self.batch_timeout())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::default().with_call_timeout_ms(self.call_timeout_ms)
    }

    pub fn actor_pool_config(&self) -> ActorPoolConfig {
        ActorPoolConfig {
            num_actors: self.num_actors,
            rollout_length: self.rollout_length,
            weight_sync_interval: self.weight_sync_interval,
            emit_frames: self.emit_frames,
            frame_buffer: self.frame_buffer,
            max_rollouts: self.max_rollouts_per_actor,
            reconnect: self.reconnect.clone(),
        }
    }

    /// Learner config with this run's logging and stats settings.
    pub fn learner_config(&self, name: &str) -> LearnerConfig {
        LearnerConfig::new(name)
            .with_stats_freq(self.stats_freq)
            .with_log_interval(Duration::from_millis(self.log_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BeastConfig::default();
        assert_eq!(config.num_actors, 4);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.rollout_length, 20);
        assert_eq!(config.frame_batch_size(), 64);
        assert_eq!(config.rollout_queue_capacity(), 64);
        assert_eq!(config.batch_mode, BatchMode::Strict);
        assert_eq!(config.submit_mode, SubmitMode::Blocking);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_queue_capacity_covers_actors() {
        let config = BeastConfig::new().with_num_actors(8).with_batch_size(4);
        assert_eq!(config.rollout_queue_capacity(), 16);
        assert_eq!(config.frame_queue_capacity(), 16);
    }

    #[test]
    fn test_validate_zero_counts() {
        let err = BeastConfig::new().with_batch_size(0).validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidCount {
                field: "batch_size",
                value: 0
            }
        );
        assert_eq!(err.to_string(), "batch_size must be > 0, got 0");

        let err = BeastConfig::new().with_call_timeout_ms(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCount { field: "call_timeout_ms", .. }));

        let err = BeastConfig::new().with_frame_buffer(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCount { field: "frame_buffer", .. }));
    }

    #[test]
    fn test_validate_capacity_below_batch() {
        let err = BeastConfig::new()
            .with_batch_size(8)
            .with_rollout_queue_capacity(4)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::CapacityTooSmall { capacity: 4, batch_size: 8, .. }));

        let err = BeastConfig::new()
            .with_frame_batch_size(32)
            .with_frame_queue_capacity(16)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::CapacityTooSmall { queue: "frame channel", .. }));
    }

    #[test]
    fn test_validate_reconnect_policy() {
        let config = BeastConfig::new().with_reconnect(ReconnectPolicy::default().with_jitter(2.0));
        assert!(matches!(config.validate(), Err(ConfigError::Reconnect(_))));
    }

    #[test]
    fn test_derived_configs() {
        let config = BeastConfig::new()
            .with_batch_size(8)
            .with_frame_batch_size(2)
            .with_batch_mode(BatchMode::Lenient)
            .with_batch_timeout_ms(25)
            .with_call_timeout_ms(300)
            .with_max_rollouts_per_actor(7);

        let batcher = config.policy_batcher_config();
        assert_eq!(batcher.batch_size, 8);
        assert_eq!(batcher.mode, BatchMode::Lenient);
        assert_eq!(batcher.timeout, Duration::from_millis(25));
        assert_eq!(config.frame_batcher_config().batch_size, 2);
        assert_eq!(config.transport_config().call_timeout(), Duration::from_millis(300));
        assert_eq!(config.actor_pool_config().max_rollouts, 7);
        assert_eq!(config.actor_pool_config().frame_buffer, 4);
        assert_eq!(config.learner_config("policy").name, "policy");
    }

    #[test]
    fn test_deserialize_partial_json() {
        let json = r#"{
            "num_actors": 2,
            "batch_size": 4,
            "batch_mode": "lenient",
            "submit_mode": "non_blocking",
            "reconnect": { "max_attempts": 3 }
        }"#;
        let config: BeastConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.num_actors, 2);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.batch_mode, BatchMode::Lenient);
        assert_eq!(config.submit_mode, SubmitMode::NonBlocking);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.initial_delay_ms, 50);
        assert_eq!(config.rollout_length, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let config = BeastConfig::new().with_frame_batch_size(16).with_emit_frames(false);
        let json = serde_json::to_string(&config).unwrap();
        let back: BeastConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
