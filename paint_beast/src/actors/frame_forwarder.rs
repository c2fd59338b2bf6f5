//! Per-actor frame/image sender.
//!
//! The actor hands finished-episode pairs to a small buffer; a dedicated
//! thread makes the blocking frame-lane call. A full frame channel stalls
//! only that thread, never the rollout loop. When the buffer is full the
//! pair is dropped and counted.

use crate::core::step::{ActorId, FrameImagePair};
use crate::transport::FrameSender;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Default)]
struct FrameCounters {
    submitted: AtomicUsize,
    dropped: AtomicUsize,
}

pub(crate) struct FrameForwarder {
    pairs: Sender<FrameImagePair>,
    /// Lane of the actor's current connection.
    lane: Arc<Mutex<FrameSender>>,
    counters: Arc<FrameCounters>,
    thread: JoinHandle<()>,
}

impl FrameForwarder {
    pub fn spawn(sender: FrameSender, buffer: usize) -> Self {
        let actor_id = sender.actor_id();
        let (pairs_tx, pairs_rx) = crossbeam_channel::bounded(buffer.max(1));
        let lane = Arc::new(Mutex::new(sender));
        let counters = Arc::new(FrameCounters::default());

        let thread_lane = Arc::clone(&lane);
        let thread_counters = Arc::clone(&counters);
        let thread = std::thread::Builder::new()
            .name(format!("Frames-{}", actor_id))
            .spawn(move || forward(actor_id, pairs_rx, &thread_lane, &thread_counters))
            .expect("Failed to spawn frame sender thread");

        Self {
            pairs: pairs_tx,
            lane,
            counters,
            thread,
        }
    }

    /// Queue a pair without waiting. Returns false if it was dropped.
    pub fn offer(&self, pair: FrameImagePair) -> bool {
        match self.pairs.try_send(pair) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Send later pairs over a new connection.
    pub fn rebind(&self, sender: FrameSender) {
        *self.lane.lock() = sender;
    }

    pub fn submitted(&self) -> usize {
        self.counters.submitted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> usize {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Deliver what is buffered, stop the thread and return
    /// `(submitted, dropped)`.
    pub fn finish(self) -> (usize, usize) {
        let FrameForwarder {
            pairs,
            lane,
            counters,
            thread,
        } = self;
        drop(pairs);
        drop(lane);
        if thread.join().is_err() {
            log::error!("frame sender thread panicked");
        }
        (
            counters.submitted.load(Ordering::Relaxed),
            counters.dropped.load(Ordering::Relaxed),
        )
    }
}

fn forward(
    actor_id: ActorId,
    pairs: Receiver<FrameImagePair>,
    lane: &Mutex<FrameSender>,
    counters: &FrameCounters,
) {
    for pair in pairs.iter() {
        // Cloned so a rebind never waits on a call in flight.
        let sender = lane.lock().clone();
        match sender.submit(pair) {
            Ok(()) => {
                counters.submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("actor {}: frame pair dropped: {}", actor_id, e);
            }
        }
    }
}
