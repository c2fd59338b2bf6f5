//! Runtime: wires queues, weight channels, the learner server, the actor
//! pool and both learners together.
//!
//! ```text
//!   Actor 0..N ──Connection──► LearnerServer ──► RolloutQueue ──► policy Learner
//!        ▲                          │        └─► FrameImageChannel ──► discriminator Learner
//!        └────── PullWeights ◄──────┘                   (both publish to their own WeightChannel)
//! ```
//!
//! The discriminator's weight channel exists from [`Runtime::builder`] on,
//! so the policy train step can subscribe to it before the runtime starts
//! and score frames with the newest discriminator.
//!
//! Shutdown order: stop actors, close the server (which closes both queues
//! and releases blocked submitters), join actors, then let each learner
//! drain its queue and join it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::actors::{aggregate_stats, ActorPool, ActorStats};
use crate::batching::{Batch, DynamicBatcher, FrameImageBatch};
use crate::config::{BeastConfig, ConfigError};
use crate::core::step::ActorId;
use crate::core::weights::{weight_channel, weight_channel_with, SharedWeightChannel};
use crate::environment::{PaintEnvironment, Policy};
use crate::learner::{Learner, LearnerHandle, LearnerStats, SnapshotSink, TrainStep};
use crate::queue::{frame_image_channel, rollout_queue, SharedFrameImageChannel, SharedRolloutQueue};
use crate::transport::LearnerServer;

/// Final stats of a finished run.
#[derive(Debug, Clone)]
pub struct RuntimeReport {
    pub actors: Vec<ActorStats>,
    /// Sum over `actors`.
    pub actor_totals: ActorStats,
    /// `None` if the learner thread panicked.
    pub policy: Option<LearnerStats>,
    pub discriminator: Option<LearnerStats>,
    pub elapsed: Duration,
}

/// Optional settings for [`Runtime::start`].
pub struct RuntimeBuilder {
    config: BeastConfig,
    initial_weights: Option<Vec<u8>>,
    discriminator_weights: SharedWeightChannel,
    policy_sink: Option<Box<dyn SnapshotSink>>,
    discriminator_sink: Option<Box<dyn SnapshotSink>>,
}

impl RuntimeBuilder {
    /// Weights actors load before their first rollout (published as v1).
    pub fn with_initial_weights(mut self, blob: Vec<u8>) -> Self {
        self.initial_weights = Some(blob);
        self
    }

    /// Publish starting discriminator weights into the discriminator channel.
    pub fn with_discriminator_weights(self, blob: Vec<u8>) -> Self {
        self.discriminator_weights.publish(blob);
        self
    }

    /// Use an existing channel for discriminator weights.
    pub fn with_discriminator_channel(mut self, channel: SharedWeightChannel) -> Self {
        self.discriminator_weights = channel;
        self
    }

    /// The channel the discriminator learner publishes to. Hand it to the
    /// policy train step, e.g. through [`WeightChannel::subscribe`].
    ///
    /// [`WeightChannel::subscribe`]: crate::core::weights::WeightChannel::subscribe
    pub fn discriminator_channel(&self) -> SharedWeightChannel {
        Arc::clone(&self.discriminator_weights)
    }

    pub fn with_policy_sink(mut self, sink: impl SnapshotSink + 'static) -> Self {
        self.policy_sink = Some(Box::new(sink));
        self
    }

    pub fn with_discriminator_sink(mut self, sink: impl SnapshotSink + 'static) -> Self {
        self.discriminator_sink = Some(Box::new(sink));
        self
    }

    /// Validate the config and start every thread.
    pub fn start<E, P, FE, FP, PT, DT>(
        self,
        env_factory: FE,
        policy_factory: FP,
        policy_train: PT,
        discriminator_train: DT,
    ) -> Result<Runtime, ConfigError>
    where
        E: PaintEnvironment + 'static,
        P: Policy + 'static,
        FE: FnMut(ActorId) -> E,
        FP: FnMut(ActorId) -> P,
        PT: TrainStep<Batch> + 'static,
        DT: TrainStep<FrameImageBatch> + 'static,
    {
        let config = self.config;
        config.validate()?;

        let rollouts = rollout_queue(config.rollout_queue_capacity(), config.submit_mode);
        let frames = frame_image_channel(config.frame_queue_capacity(), config.submit_mode);
        let policy_weights = match self.initial_weights {
            Some(blob) => weight_channel_with(blob),
            None => weight_channel(),
        };
        let discriminator_weights = self.discriminator_weights;

        let server = LearnerServer::new(
            rollouts.clone(),
            frames.clone(),
            policy_weights.clone(),
            config.transport_config(),
        );

        let mut policy = Learner::new(
            config
                .learner_config("policy")
                .with_max_train_steps(config.max_train_steps),
            DynamicBatcher::new(rollouts, config.policy_batcher_config()),
            policy_train,
            policy_weights,
        );
        if let Some(mut sink) = self.policy_sink {
            policy = policy.with_sink(move |version: u64, blob: &[u8]| sink.on_publish(version, blob));
        }

        let mut discriminator = Learner::new(
            config.learner_config("discriminator"),
            DynamicBatcher::new(frames, config.frame_batcher_config()),
            discriminator_train,
            discriminator_weights.clone(),
        );
        if let Some(mut sink) = self.discriminator_sink {
            discriminator =
                discriminator.with_sink(move |version: u64, blob: &[u8]| sink.on_publish(version, blob));
        }

        let policy_learner = policy.spawn();
        let discriminator_learner = discriminator.spawn();
        let actors = ActorPool::spawn(
            config.actor_pool_config(),
            &server.connector(),
            env_factory,
            policy_factory,
        );

        log::info!(
            "runtime started: {} actors, batch {} x {} steps, frame batch {}, queues {}/{}",
            config.num_actors,
            config.batch_size,
            config.rollout_length,
            config.frame_batch_size(),
            config.rollout_queue_capacity(),
            config.frame_queue_capacity()
        );

        Ok(Runtime {
            config,
            server,
            discriminator_weights,
            actors,
            policy_learner,
            discriminator_learner,
            started: Instant::now(),
        })
    }
}

/// A running actor/learner system.
pub struct Runtime {
    config: BeastConfig,
    server: LearnerServer,
    discriminator_weights: SharedWeightChannel,
    actors: ActorPool,
    policy_learner: LearnerHandle,
    discriminator_learner: LearnerHandle,
    started: Instant,
}

impl Runtime {
    pub fn builder(config: BeastConfig) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            initial_weights: None,
            discriminator_weights: weight_channel(),
            policy_sink: None,
            discriminator_sink: None,
        }
    }

    pub fn config(&self) -> &BeastConfig {
        &self.config
    }

    pub fn server(&self) -> &LearnerServer {
        &self.server
    }

    pub fn rollout_queue(&self) -> &SharedRolloutQueue {
        self.server.rollout_queue()
    }

    pub fn frame_channel(&self) -> &SharedFrameImageChannel {
        self.server.frame_channel()
    }

    /// Weights the actors pull.
    pub fn policy_weights(&self) -> &SharedWeightChannel {
        self.server.weights()
    }

    pub fn discriminator_weights(&self) -> &SharedWeightChannel {
        &self.discriminator_weights
    }

    /// Ask every actor and learner for a stats report.
    pub fn request_stats(&self) {
        self.actors.request_stats();
        self.policy_learner.request_stats();
        self.discriminator_learner.request_stats();
    }

    /// Actor reports received so far.
    pub fn actor_stats(&self) -> Vec<ActorStats> {
        self.actors.collect_stats()
    }

    /// Learner reports received so far, policy learner first.
    pub fn learner_stats(&self) -> Vec<LearnerStats> {
        let mut stats = self.policy_learner.drain_stats();
        stats.extend(self.discriminator_learner.drain_stats());
        stats
    }

    pub fn actors_finished(&self) -> bool {
        self.actors.finished_count() == self.actors.len()
    }

    /// Wait until every actor has exited on its own. Returns false on timeout.
    pub fn wait_for_actors(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.actors_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        true
    }

    /// Stop everything in order and collect final stats.
    pub fn shutdown(self) -> RuntimeReport {
        log::info!("runtime shutting down");
        self.actors.stop_all();
        self.server.shutdown();
        let actors = self.actors.join_all();

        let policy = join_learner("policy", self.policy_learner);
        let discriminator = join_learner("discriminator", self.discriminator_learner);

        let actor_totals = aggregate_stats(&actors);
        let elapsed = self.started.elapsed();
        log::info!(
            "runtime finished in {:.1}s: {} env steps, {} rollouts, {} frame pairs",
            elapsed.as_secs_f32(),
            actor_totals.steps,
            actor_totals.rollouts_submitted,
            actor_totals.frame_pairs_submitted
        );

        RuntimeReport {
            actors,
            actor_totals,
            policy,
            discriminator,
            elapsed,
        }
    }
}

fn join_learner(name: &str, handle: LearnerHandle) -> Option<LearnerStats> {
    match handle.join() {
        Ok(stats) => Some(stats),
        Err(_) => {
            log::error!("{} learner panicked", name);
            None
        }
    }
}
