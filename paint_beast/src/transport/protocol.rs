//! RPC contract between actors and the learner server.
//!
//! | call                   | request          | reply                   |
//! |------------------------|------------------|-------------------------|
//! | `SubmitRollout`        | `Rollout`        | [`Ack`]                 |
//! | `PullWeights`          | nothing          | `Arc<WeightSnapshot>`   |
//! | `SubmitFrameImagePair` | `FrameImagePair` | [`Ack`]                 |
//!
//! Each call kind travels on its own lane: a request stream and a reply
//! stream, serviced by a dedicated server thread. Calls on one lane are
//! strictly sequential; lanes never wait on each other.

use crate::core::step::ActorId;
use crate::core::weights::WeightSnapshot;
use crate::queue::QueueError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a submission: placed in the queue, or why not.
pub type Ack = Result<(), QueueError>;

/// Reply to `PullWeights`.
pub type WeightsReply = Arc<WeightSnapshot>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server dropped the connection or went away.
    #[error("connection to learner lost")]
    ConnectionLost,
    /// A weights pull got no reply in time.
    #[error("call timed out after {timeout:?}")]
    CallTimeout { timeout: Duration },
    /// The server is shut down and takes no new connections.
    #[error("learner server refused connection from actor {actor_id}")]
    Refused { actor_id: ActorId },
    /// The server answered, but the queue did not accept the item.
    #[error("submission rejected: {0}")]
    Rejected(#[from] QueueError),
}

impl TransportError {
    /// Worth reconnecting over.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionLost | TransportError::CallTimeout { .. }
        )
    }
}

/// Client half of one lane.
pub(crate) struct ClientLane<Req, Resp> {
    requests: Sender<Req>,
    replies: Receiver<Resp>,
}

impl<Req, Resp> Clone for ClientLane<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            replies: self.replies.clone(),
        }
    }
}

/// Server half of one lane.
pub(crate) struct ServerLane<Req, Resp> {
    pub requests: Receiver<Req>,
    pub replies: Sender<Resp>,
}

pub(crate) fn lane<Req, Resp>() -> (ClientLane<Req, Resp>, ServerLane<Req, Resp>) {
    let (req_tx, req_rx) = crossbeam_channel::unbounded();
    let (resp_tx, resp_rx) = crossbeam_channel::unbounded();
    (
        ClientLane {
            requests: req_tx,
            replies: resp_rx,
        },
        ServerLane {
            requests: req_rx,
            replies: resp_tx,
        },
    )
}

impl<Req, Resp> ClientLane<Req, Resp> {
    /// Send one request and wait for its reply.
    ///
    /// Replies left over from an earlier timed-out call are discarded first.
    /// Calls through clones of one lane must not overlap.
    pub fn call(&self, request: Req, timeout: Option<Duration>) -> Result<Resp, TransportError> {
        while self.replies.try_recv().is_ok() {}

        self.requests
            .send(request)
            .map_err(|_| TransportError::ConnectionLost)?;

        match timeout {
            None => self.replies.recv().map_err(|_| TransportError::ConnectionLost),
            Some(timeout) => self.replies.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => TransportError::CallTimeout { timeout },
                RecvTimeoutError::Disconnected => TransportError::ConnectionLost,
            }),
        }
    }
}
