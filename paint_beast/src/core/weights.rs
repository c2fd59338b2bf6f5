//! Versioned last-value-wins weight broadcast.
//!
//! A learner publishes serialized parameters; any number of readers fetch
//! the latest snapshot. Publication swaps an `Arc`, so a reader holds either
//! the complete previous snapshot or the complete new one, never a partial
//! write. No history is kept: a slow reader skips intermediate versions.
//!
//! ```text
//! Learner Thread                            Actor Threads
//! ┌──────────────────┐                      ┌──────────────────┐
//! │ train step       │                      │ policy.load(...) │
//! │       ↓          │                      │       ↑          │
//! │ encode weights   │                      │ VersionTracker   │
//! │       ↓          │                      │       ↑          │
//! │   Vec<u8> ─────────── WeightChannel ──────→ Arc<Snapshot>  │
//! └──────────────────┘                      └──────────────────┘
//! ```

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An opaque parameter blob and the version it was published as.
///
/// Version 0 is the empty snapshot a channel starts with.
#[derive(Clone, PartialEq, Eq)]
pub struct WeightSnapshot {
    version: u64,
    blob: Vec<u8>,
}

impl WeightSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// True for the placeholder snapshot a channel starts with.
    pub fn is_initial(&self) -> bool {
        self.version == 0
    }

    /// How many versions behind `current_version` this snapshot is.
    pub fn lag(&self, current_version: u64) -> u64 {
        current_version.saturating_sub(self.version)
    }
}

impl fmt::Debug for WeightSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightSnapshot")
            .field("version", &self.version)
            .field("bytes", &self.blob.len())
            .finish()
    }
}

/// Single-writer, many-reader publication of the latest weights.
pub struct WeightChannel {
    current: RwLock<Arc<WeightSnapshot>>,
    reads: AtomicU64,
}

impl WeightChannel {
    /// Create a channel holding the empty version-0 snapshot.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(WeightSnapshot {
                version: 0,
                blob: Vec::new(),
            })),
            reads: AtomicU64::new(0),
        }
    }

    /// Create a channel whose first snapshot (version 1) is `blob`.
    pub fn with_initial(blob: Vec<u8>) -> Self {
        let channel = Self::new();
        channel.publish(blob);
        channel
    }

    /// Replace the current snapshot. Returns the new version (previous + 1).
    pub fn publish(&self, blob: Vec<u8>) -> u64 {
        let mut guard = self.current.write();
        let version = guard.version + 1;
        *guard = Arc::new(WeightSnapshot { version, blob });
        version
    }

    /// Current snapshot. Never blocks on a newer version.
    pub fn latest(&self) -> Arc<WeightSnapshot> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Arc::clone(&self.current.read())
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Number of `latest()` calls served.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Reader that only yields snapshots newer than the last one it saw.
    pub fn subscribe(self: &Arc<Self>) -> WeightSubscriber {
        WeightSubscriber {
            channel: Arc::clone(self),
            tracker: VersionTracker::new(),
        }
    }
}

impl Default for WeightChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe shared weight channel.
pub type SharedWeightChannel = Arc<WeightChannel>;

/// Create a new shared weight channel.
pub fn weight_channel() -> SharedWeightChannel {
    Arc::new(WeightChannel::new())
}

/// Create a new shared weight channel with initial weights.
pub fn weight_channel_with(blob: Vec<u8>) -> SharedWeightChannel {
    Arc::new(WeightChannel::with_initial(blob))
}

/// Remembers the newest version a reader has accepted.
///
/// Snapshots can reach a reader out of order (a late reply after a timed-out
/// pull); the tracker keeps the observed sequence non-decreasing.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionTracker {
    seen: u64,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest version accepted so far (0 before any).
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Accept `snapshot` if it is newer than anything seen.
    pub fn accept(&mut self, snapshot: Arc<WeightSnapshot>) -> Option<Arc<WeightSnapshot>> {
        if snapshot.version > self.seen {
            self.seen = snapshot.version;
            Some(snapshot)
        } else {
            None
        }
    }
}

/// In-process reader of a [`WeightChannel`].
pub struct WeightSubscriber {
    channel: SharedWeightChannel,
    tracker: VersionTracker,
}

impl WeightSubscriber {
    /// Latest snapshot if it is newer than the last one returned.
    pub fn poll(&mut self) -> Option<Arc<WeightSnapshot>> {
        self.tracker.accept(self.channel.latest())
    }

    pub fn seen_version(&self) -> u64 {
        self.tracker.seen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_new_channel_starts_empty() {
        let channel = WeightChannel::new();
        let snap = channel.latest();
        assert_eq!(snap.version(), 0);
        assert!(snap.is_initial());
        assert!(snap.blob().is_empty());
    }

    #[test]
    fn test_publish_increments_version() {
        let channel = WeightChannel::new();
        assert_eq!(channel.publish(vec![1]), 1);
        assert_eq!(channel.publish(vec![2]), 2);
        assert_eq!(channel.version(), 2);
        assert_eq!(channel.latest().blob(), &[2]);
    }

    #[test]
    fn test_with_initial_is_version_one() {
        let channel = WeightChannel::with_initial(vec![9, 9]);
        assert_eq!(channel.version(), 1);
        assert_eq!(channel.latest().blob(), &[9, 9]);
    }

    #[test]
    fn test_late_reader_sees_only_newest() {
        let channel = WeightChannel::new();
        channel.publish(b"v1".to_vec());
        channel.publish(b"v2".to_vec());

        for _ in 0..3 {
            let snap = channel.latest();
            assert_eq!(snap.version(), 2);
            assert_eq!(snap.blob(), b"v2");
        }
    }

    #[test]
    fn test_held_snapshot_is_unaffected_by_publish() {
        let channel = WeightChannel::with_initial(vec![1, 1, 1]);
        let held = channel.latest();
        channel.publish(vec![2, 2, 2]);
        assert_eq!(held.version(), 1);
        assert_eq!(held.blob(), &[1, 1, 1]);
    }

    #[test]
    fn test_tracker_rejects_older_versions() {
        let channel = WeightChannel::new();
        channel.publish(vec![1]);
        let v1 = channel.latest();
        channel.publish(vec![2]);
        let v2 = channel.latest();

        let mut tracker = VersionTracker::new();
        assert!(tracker.accept(Arc::clone(&v2)).is_some());
        assert!(tracker.accept(v1).is_none());
        assert!(tracker.accept(v2).is_none());
        assert_eq!(tracker.seen(), 2);
    }

    #[test]
    fn test_subscriber_skips_unchanged() {
        let channel = weight_channel();
        let mut sub = channel.subscribe();
        assert!(sub.poll().is_none());

        channel.publish(vec![1]);
        channel.publish(vec![2]);
        let snap = sub.poll().unwrap();
        assert_eq!(snap.version(), 2);
        assert!(sub.poll().is_none());
        assert_eq!(sub.seen_version(), 2);
    }

    #[test]
    fn test_concurrent_readers_observe_non_decreasing_versions() {
        let channel = weight_channel();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..2_000 {
                        let snap = channel.latest();
                        assert!(snap.version() >= last);
                        // Blob always matches its version: no torn writes.
                        if !snap.is_initial() {
                            assert_eq!(snap.blob(), snap.version().to_le_bytes().as_slice());
                        }
                        last = snap.version();
                    }
                })
            })
            .collect();

        for v in 1..=500u64 {
            channel.publish(v.to_le_bytes().to_vec());
        }

        for r in readers {
            r.join().unwrap();
        }
    }
}
