//! Actor thread: steps one painting environment and feeds the learners.
//!
//! Each actor runs in its own thread and:
//! 1. Queries the policy and steps the environment
//! 2. Accumulates steps into fixed-length rollouts
//! 3. Submits rollouts (and, at episode end, frame/image pairs)
//! 4. Pulls new weights every `weight_sync_interval` rollouts
//!
//! A lost connection never kills the actor: the partial rollout is dropped,
//! the actor reconnects with backoff and starts a fresh rollout.
//!
//! Frame/image pairs leave through a [`FrameForwarder`], so a stalled
//! discriminator channel never holds up rollout submission.

use super::frame_forwarder::FrameForwarder;
use crate::buffers::RolloutBuffer;
use crate::core::step::{ActorId, FrameImagePair, Step};
use crate::core::weights::VersionTracker;
use crate::environment::{PaintEnvironment, Policy};
use crate::messages::{ActorMsg, ActorStats};
use crate::queue::QueueError;
use crate::transport::{Backoff, Connection, Connector, ReconnectPolicy, TransportError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Actor configuration.
#[derive(Debug, Clone)]
pub struct ActorConfig {
    pub actor_id: ActorId,
    /// Steps per rollout.
    pub rollout_length: usize,
    /// Rollouts between weight pulls.
    pub weight_sync_interval: usize,
    /// Submit a frame/image pair at the end of every episode.
    pub emit_frames: bool,
    /// Pairs waiting for the frame lane before new ones are dropped.
    pub frame_buffer: usize,
    /// Stop after this many submitted rollouts (0 = unlimited).
    pub max_rollouts: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            actor_id: 0,
            rollout_length: 20,
            weight_sync_interval: 1,
            emit_frames: true,
            frame_buffer: 4,
            max_rollouts: 0,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ActorConfig {
    pub fn for_actor(actor_id: ActorId) -> Self {
        Self {
            actor_id,
            ..Default::default()
        }
    }

    pub fn with_rollout_length(mut self, length: usize) -> Self {
        self.rollout_length = length;
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

    pub fn with_max_rollouts(mut self, rollouts: usize) -> Self {
        self.max_rollouts = rollouts;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

/// Handle for a spawned actor thread.
pub struct ActorHandle {
    pub actor_id: ActorId,
    /// Returns the final stats when the actor exits.
    pub thread: JoinHandle<ActorStats>,
    pub stats_rx: Receiver<ActorStats>,
    pub cmd_tx: Sender<ActorMsg>,
    stop_flag: Arc<AtomicBool>,
}

impl ActorHandle {
    /// Ask the actor to exit. Never lost, even with a full command channel.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        // Wakes an actor waiting out a reconnect delay.
        let _ = self.cmd_tx.try_send(ActorMsg::Stop);
    }

    pub fn request_stats(&self) {
        let _ = self.cmd_tx.try_send(ActorMsg::RequestStats);
    }

    /// Latest stats reply, if one has arrived (non-blocking).
    pub fn get_stats(&self) -> Option<ActorStats> {
        self.stats_rx.try_recv().ok()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the actor thread and return its final stats.
    pub fn join(self) -> std::thread::Result<ActorStats> {
        self.thread.join()
    }
}

/// How the actor loop should continue after a transport call.
enum Flow {
    Continue,
    /// Connection failed; reconnect and start a fresh rollout.
    Reconnect(TransportError),
    /// Learner is gone for good.
    Exit,
}

/// Actor that collects experience over a [`Connection`].
pub struct Actor<E, P> {
    config: ActorConfig,
    env: E,
    policy: P,
    connector: Connector,
    cmd_rx: Receiver<ActorMsg>,
    stop_flag: Arc<AtomicBool>,
    stats_tx: Sender<ActorStats>,
    stats: ActorStats,
    frames: Option<FrameForwarder>,
    tracker: VersionTracker,
    backoff: Backoff,
}

impl<E, P> Actor<E, P>
where
    E: PaintEnvironment + 'static,
    P: Policy + 'static,
{
    /// Spawn the actor thread.
    pub fn spawn(config: ActorConfig, env: E, policy: P, connector: Connector) -> ActorHandle {
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(16);
        let (stats_tx, stats_rx) = crossbeam_channel::bounded(100);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let actor_id = config.actor_id;

        let actor = Actor {
            stop_flag: Arc::clone(&stop_flag),
            frames: None,
            stats: ActorStats::new(actor_id),
            backoff: config.reconnect.backoff(),
            tracker: VersionTracker::new(),
            config,
            env,
            policy,
            connector,
            cmd_rx,
            stats_tx,
        };

        let thread = std::thread::Builder::new()
            .name(format!("Actor-{}", actor_id))
            .spawn(move || actor.run())
            .expect("Failed to spawn actor thread");

        ActorHandle {
            actor_id,
            thread,
            stats_rx,
            cmd_tx,
            stop_flag,
        }
    }

    fn run(mut self) -> ActorStats {
        let id = self.config.actor_id;
        let mut buffer = RolloutBuffer::new(id, self.config.rollout_length);
        let sync_interval = self.config.weight_sync_interval.max(1);

        let Some(mut conn) = self.establish() else {
            log::info!("actor {} could not reach the learner; exiting", id);
            return self.stats;
        };
        if self.config.emit_frames {
            self.frames = Some(FrameForwarder::spawn(
                conn.frame_sender(),
                self.config.frame_buffer,
            ));
        }

        let mut observation = self.env.reset();
        let mut agent_state = self.policy.initial_state();
        let mut episode_step = 0u32;
        let mut episode_return = 0.0f32;
        let mut frame_sequence = 0u64;
        let mut since_sync = 0usize;
        buffer.begin(self.stats.weight_version, agent_state.clone());

        'collect: loop {
            if self.handle_commands() {
                break;
            }

            let output = self.policy.act(&observation, &agent_state);
            let result = self.env.step(&output.action);
            episode_step += 1;
            episode_return += result.reward;
            self.stats.add_steps(1);

            let done = result.done();
            let step = Step::new(
                std::mem::replace(&mut observation, result.observation),
                output.action,
                output.policy_logits,
                result.reward,
                done,
            )
            .with_baseline(output.baseline)
            .with_episode(episode_step, episode_return);
            agent_state = output.agent_state;

            let mut flow = Flow::Continue;

            if done {
                self.stats.record_episode(episode_return);
                if let Some(frames) = &self.frames {
                    let pair = FrameImagePair::new(
                        id,
                        frame_sequence,
                        self.env.frame(),
                        self.env.target_image(),
                    );
                    frame_sequence += 1;
                    if !frames.offer(pair) {
                        log::debug!("actor {}: frame buffer full, pair dropped", id);
                    }
                }
                observation = self.env.reset();
                agent_state = self.policy.initial_state();
                episode_step = 0;
                episode_return = 0.0;
            }

            if let Some(rollout) = buffer.push(step) {
                // Attempts, not acks, drive weight sync.
                since_sync += 1;
                flow = match conn.submit_rollout(rollout) {
                    Ok(()) => {
                        self.stats.rollouts_submitted += 1;
                        Flow::Continue
                    }
                    Err(e) => self.classify(e, true),
                };

                if let Flow::Continue = flow {
                    if self.config.max_rollouts > 0
                        && self.stats.rollouts_submitted >= self.config.max_rollouts
                    {
                        break 'collect;
                    }
                    if since_sync >= sync_interval {
                        since_sync = 0;
                        if let Err(e) = self.sync_weights(&conn) {
                            flow = self.classify(e, false);
                        }
                    }
                }
                buffer.begin(self.stats.weight_version, agent_state.clone());
            }

            match flow {
                Flow::Continue => {}
                Flow::Exit => break,
                Flow::Reconnect(err) => {
                    log::warn!("actor {}: {}; reconnecting", id, err);
                    if buffer.discard() > 0 {
                        self.stats.rollouts_discarded += 1;
                    }
                    drop(conn);
                    match self.establish() {
                        Some(fresh) => {
                            if let Some(frames) = &self.frames {
                                frames.rebind(fresh.frame_sender());
                            }
                            conn = fresh;
                            self.stats.reconnects += 1;
                            since_sync = 0;
                            buffer.begin(self.stats.weight_version, agent_state.clone());
                        }
                        None => break,
                    }
                }
            }
        }

        if let Some(frames) = self.frames.take() {
            let (submitted, dropped) = frames.finish();
            self.stats.frame_pairs_submitted = submitted;
            self.stats.frame_pairs_dropped = dropped;
        }
        // `conn` (if still live after a failed reconnect) drops at scope end.

        log::debug!(
            "actor {} exiting after {} steps, {} rollouts",
            id,
            self.stats.steps,
            self.stats.rollouts_submitted
        );
        self.stats
    }

    /// Stats with the frame sender's counters folded in.
    fn snapshot_stats(&mut self) -> ActorStats {
        if let Some(frames) = &self.frames {
            self.stats.frame_pairs_submitted = frames.submitted();
            self.stats.frame_pairs_dropped = frames.dropped();
        }
        self.stats.clone()
    }

    /// Map a transport failure to what the loop does next.
    ///
    /// `rollout_lost` marks a failed rollout submission, whose complete
    /// rollout is gone either way.
    fn classify(&mut self, err: TransportError, rollout_lost: bool) -> Flow {
        match err {
            TransportError::Rejected(QueueError::QueueFull { .. }) => {
                self.stats.rollouts_dropped += 1;
                Flow::Continue
            }
            TransportError::Rejected(_) | TransportError::Refused { .. } => {
                log::info!("actor {}: learner closed ({})", self.config.actor_id, err);
                Flow::Exit
            }
            TransportError::ConnectionLost | TransportError::CallTimeout { .. } => {
                if rollout_lost {
                    self.stats.rollouts_discarded += 1;
                }
                Flow::Reconnect(err)
            }
        }
    }

    /// Returns true if the actor should stop.
    fn handle_commands(&mut self) -> bool {
        if self.stop_requested() {
            return true;
        }
        while let Ok(msg) = self.cmd_rx.try_recv() {
            match msg {
                ActorMsg::Stop => return true,
                ActorMsg::RequestStats => {
                    let stats = self.snapshot_stats();
                    let _ = self.stats_tx.try_send(stats);
                }
            }
        }
        false
    }

    fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// Pull weights and load them if they are newer than the loaded ones.
    fn sync_weights(&mut self, conn: &Connection) -> Result<(), TransportError> {
        let snapshot = conn.pull_weights()?;
        if let Some(snapshot) = self.tracker.accept(snapshot) {
            match self.policy.load_weights(snapshot.blob()) {
                Ok(()) => self.stats.weight_version = snapshot.version(),
                Err(e) => log::warn!(
                    "actor {} failed to load weights v{}: {}",
                    self.config.actor_id,
                    snapshot.version(),
                    e
                ),
            }
        }
        Ok(())
    }

    /// Connect and load current weights, retrying with backoff.
    ///
    /// Returns `None` if the actor was told to stop, the server refused, or
    /// the retry budget ran out.
    fn establish(&mut self) -> Option<Connection> {
        loop {
            if self.stop_requested() {
                return None;
            }
            let err = match self.connector.connect(self.config.actor_id) {
                Ok(conn) => match self.sync_weights(&conn) {
                    Ok(()) => {
                        self.backoff.reset();
                        return Some(conn);
                    }
                    Err(e) => e,
                },
                Err(e @ TransportError::Refused { .. }) => {
                    log::info!("actor {}: {}", self.config.actor_id, e);
                    return None;
                }
                Err(e) => e,
            };

            let Some(delay) = self.backoff.next_delay() else {
                log::error!(
                    "actor {} giving up after {} attempts: {}",
                    self.config.actor_id,
                    self.backoff.attempts(),
                    err
                );
                return None;
            };
            log::debug!("actor {} retrying in {:?}: {}", self.config.actor_id, delay, err);

            match self.cmd_rx.recv_timeout(delay) {
                Ok(ActorMsg::Stop) => return None,
                Ok(ActorMsg::RequestStats) => {
                    let stats = self.snapshot_stats();
                    let _ = self.stats_tx.try_send(stats);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}
