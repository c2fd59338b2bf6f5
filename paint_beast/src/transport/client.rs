//! Actor side of the transport.

use super::protocol::{Ack, ClientLane, TransportError, WeightsReply};
use crate::core::step::{ActorId, FrameImagePair, Rollout};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Longest wait for a `PullWeights` reply.
    pub call_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 1_000,
        }
    }
}

impl TransportConfig {
    pub fn with_call_timeout_ms(mut self, ms: u64) -> Self {
        self.call_timeout_ms = ms;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// A persistent session between one actor and the learner server.
///
/// Dropping the connection ends the actor's producer registration on both
/// queues.
pub struct Connection {
    actor_id: ActorId,
    config: TransportConfig,
    rollouts: ClientLane<Rollout, Ack>,
    weights: ClientLane<(), WeightsReply>,
    frames: FrameSender,
}

/// Frame lane of a [`Connection`], detachable so frame submission can run
/// on its own thread.
///
/// The lane stays open while any clone is alive. Only one call may be in
/// flight on a lane at a time.
#[derive(Clone)]
pub struct FrameSender {
    actor_id: ActorId,
    lane: ClientLane<FrameImagePair, Ack>,
}

impl FrameSender {
    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    /// Returns once the pair is in the frame/image channel.
    pub fn submit(&self, pair: FrameImagePair) -> Result<(), TransportError> {
        Ok(self.lane.call(pair, None)??)
    }
}

impl Connection {
    pub(crate) fn new(
        actor_id: ActorId,
        config: TransportConfig,
        rollouts: ClientLane<Rollout, Ack>,
        weights: ClientLane<(), WeightsReply>,
        frames: ClientLane<FrameImagePair, Ack>,
    ) -> Self {
        Self {
            actor_id,
            config,
            rollouts,
            weights,
            frames: FrameSender {
                actor_id,
                lane: frames,
            },
        }
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    /// Returns once the rollout is in the queue.
    ///
    /// A full queue in blocking mode stalls this call; in non-blocking mode
    /// it fails with `Rejected(QueueFull)`.
    pub fn submit_rollout(&self, rollout: Rollout) -> Result<(), TransportError> {
        Ok(self.rollouts.call(rollout, None)??)
    }

    /// Latest published weights. Never waits for a newer version.
    pub fn pull_weights(&self) -> Result<WeightsReply, TransportError> {
        self.weights.call((), Some(self.config.call_timeout()))
    }

    /// Returns once the pair is in the frame/image channel.
    pub fn submit_frame_image_pair(&self, pair: FrameImagePair) -> Result<(), TransportError> {
        self.frames.submit(pair)
    }

    /// A handle on this connection's frame lane.
    pub fn frame_sender(&self) -> FrameSender {
        self.frames.clone()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("actor_id", &self.actor_id)
            .field("config", &self.config)
            .finish()
    }
}
