//! Learner side of the transport.
//!
//! ```text
//!  Actor 0 ──┬─ rollout lane ──→ [handler] ──→ RolloutQueue
//!            ├─ weights lane ──→ [handler] ←── WeightChannel
//!            └─ frame lane ────→ [handler] ──→ FrameImageChannel
//!  Actor 1 ──┬─ ...
//! ```
//!
//! Every lane of every connection has its own handler thread. A handler
//! stalled on a full queue holds up only its own lane.

use super::client::{Connection, TransportConfig};
use super::protocol::{lane, Ack, ServerLane, TransportError, WeightsReply};
use crate::core::step::{ActorId, FrameImagePair, Rollout};
use crate::core::weights::SharedWeightChannel;
use crate::queue::{SharedFrameImageChannel, SharedRolloutQueue};
use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

struct ConnectionEntry {
    /// Never sent on; dropping it stops the handlers.
    _kill: Sender<()>,
    handlers: Vec<JoinHandle<()>>,
}

impl ConnectionEntry {
    fn is_live(&self) -> bool {
        self.handlers.iter().any(|h| !h.is_finished())
    }
}

#[derive(Default)]
struct Connections {
    live: HashMap<ActorId, ConnectionEntry>,
    /// Handlers of dropped connections still winding down.
    retired: Vec<JoinHandle<()>>,
}

impl Connections {
    /// Join retired handlers that have already exited.
    fn reap_finished(&mut self) {
        let (done, running): (Vec<_>, Vec<_>) =
            self.retired.drain(..).partition(|h| h.is_finished());
        self.retired = running;
        for handle in done {
            if handle.join().is_err() {
                log::error!("lane handler panicked");
            }
        }
    }

    fn retire(&mut self, entry: ConnectionEntry) {
        self.reap_finished();
        self.retired.extend(entry.handlers);
    }
}

struct ServerShared {
    rollouts: SharedRolloutQueue,
    frames: SharedFrameImageChannel,
    weights: SharedWeightChannel,
    connections: Mutex<Connections>,
    shutdown: AtomicBool,
    accepted: AtomicU64,
}

impl ServerShared {
    fn connect(&self, actor_id: ActorId, config: &TransportConfig) -> Result<Connection, TransportError> {
        let mut connections = self.connections.lock();
        if self.shutdown.load(Ordering::Acquire) {
            return Err(TransportError::Refused { actor_id });
        }

        let (kill_tx, kill_rx) = crossbeam_channel::bounded::<()>(0);
        let (rollout_client, rollout_server) = lane::<Rollout, Ack>();
        let (weights_client, weights_server) = lane::<(), WeightsReply>();
        let (frame_client, frame_server) = lane::<FrameImagePair, Ack>();

        let rollout_producer = self.rollouts.register_producer(actor_id);
        let frame_producer = self.frames.register_producer(actor_id);
        let weights = Arc::clone(&self.weights);

        let handlers = vec![
            spawn_lane(
                format!("rollout-lane-{}", actor_id),
                rollout_server,
                kill_rx.clone(),
                move |rollout| rollout_producer.queue().enqueue(rollout),
            ),
            spawn_lane(
                format!("weights-lane-{}", actor_id),
                weights_server,
                kill_rx.clone(),
                move |()| weights.latest(),
            ),
            spawn_lane(
                format!("frame-lane-{}", actor_id),
                frame_server,
                kill_rx,
                move |pair| frame_producer.queue().enqueue(pair),
            ),
        ];

        let entry = ConnectionEntry {
            _kill: kill_tx,
            handlers,
        };
        if let Some(old) = connections.live.insert(actor_id, entry) {
            log::warn!("actor {} reconnected; dropping its previous connection", actor_id);
            connections.retire(old);
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);
        log::debug!("actor {} connected", actor_id);

        Ok(Connection::new(
            actor_id,
            config.clone(),
            rollout_client,
            weights_client,
            frame_client,
        ))
    }
}

/// Run one lane until the client hangs up or the connection is killed.
fn spawn_lane<Req, Resp, F>(
    name: String,
    lane: ServerLane<Req, Resp>,
    kill: Receiver<()>,
    mut handle: F,
) -> JoinHandle<()>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: FnMut(Req) -> Resp + Send + 'static,
{
    std::thread::Builder::new()
        .name(name)
        .spawn(move || loop {
            select! {
                recv(lane.requests) -> request => match request {
                    Ok(request) => {
                        if lane.replies.send(handle(request)).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(kill) -> _ => break,
            }
        })
        .expect("Failed to spawn lane handler thread")
}

/// Hands out connections to a [`LearnerServer`].
#[derive(Clone)]
pub struct Connector {
    shared: Arc<ServerShared>,
    config: TransportConfig,
}

impl Connector {
    /// Open a connection for `actor_id`.
    ///
    /// An existing connection for the same actor is dropped.
    pub fn connect(&self, actor_id: ActorId) -> Result<Connection, TransportError> {
        self.shared.connect(actor_id, &self.config)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

/// Serves actor connections on behalf of the learners.
pub struct LearnerServer {
    shared: Arc<ServerShared>,
    config: TransportConfig,
}

impl LearnerServer {
    pub fn new(
        rollouts: SharedRolloutQueue,
        frames: SharedFrameImageChannel,
        weights: SharedWeightChannel,
        config: TransportConfig,
    ) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                rollouts,
                frames,
                weights,
                connections: Mutex::new(Connections::default()),
                shutdown: AtomicBool::new(false),
                accepted: AtomicU64::new(0),
            }),
            config,
        }
    }

    pub fn connector(&self) -> Connector {
        Connector {
            shared: Arc::clone(&self.shared),
            config: self.config.clone(),
        }
    }

    /// Forcibly drop an actor's connection. Returns false if it had none.
    pub fn disconnect(&self, actor_id: ActorId) -> bool {
        let mut connections = self.shared.connections.lock();
        match connections.live.remove(&actor_id) {
            Some(entry) => {
                connections.retire(entry);
                log::info!("disconnected actor {}", actor_id);
                true
            }
            None => false,
        }
    }

    /// Connections with at least one running handler.
    pub fn connection_count(&self) -> usize {
        self.shared
            .connections
            .lock()
            .live
            .values()
            .filter(|e| e.is_live())
            .count()
    }

    /// Handler threads of dropped connections not yet joined.
    pub fn retired_handlers(&self) -> usize {
        self.shared.connections.lock().retired.len()
    }

    /// Connections accepted since the server started.
    pub fn accepted(&self) -> u64 {
        self.shared.accepted.load(Ordering::Relaxed)
    }

    pub fn rollout_queue(&self) -> &SharedRolloutQueue {
        &self.shared.rollouts
    }

    pub fn frame_channel(&self) -> &SharedFrameImageChannel {
        &self.shared.frames
    }

    pub fn weights(&self) -> &SharedWeightChannel {
        &self.shared.weights
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Refuse new connections, close both queues, drop every connection and
    /// join all handler threads.
    pub fn shutdown(&self) {
        let handlers = {
            let mut connections = self.shared.connections.lock();
            if self.shared.shutdown.swap(true, Ordering::AcqRel) {
                return;
            }
            // Unblocks handlers stuck in a full queue.
            self.shared.rollouts.close();
            self.shared.frames.close();

            let mut handlers = std::mem::take(&mut connections.retired);
            for (_, entry) in connections.live.drain() {
                handlers.extend(entry.handlers);
            }
            handlers
        };

        let count = handlers.len();
        for handler in handlers {
            if handler.join().is_err() {
                log::error!("lane handler panicked");
            }
        }
        log::info!("learner server shut down ({} handler threads joined)", count);
    }
}

impl Drop for LearnerServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
