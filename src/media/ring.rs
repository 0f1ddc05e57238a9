//! Frame ring buffer for late-joiner support
//!
//! When a new client attaches to a running channel it is primed with the
//! most recent frames so playback can start before the next live frame
//! arrives. The ring keeps a bounded window of recent frames and overwrites
//! the oldest entry once full, so producers never block on it.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;

/// Default number of frames retained for late joiners
pub const DEFAULT_RING_CAPACITY: usize = 8192;

/// Bounded FIFO of recent frames, overwrite-oldest on overflow
///
/// Frames are shared by reference counting; the ring never copies frame
/// data. The ring carries its own lock so it can be snapshotted while the
/// owning hub holds only its read lock. When both locks are taken the hub
/// lock is acquired first.
#[derive(Debug)]
pub struct FrameRing {
    inner: Mutex<RingInner>,
}

#[derive(Debug)]
struct RingInner {
    frames: VecDeque<Bytes>,
    capacity: usize,
}

impl FrameRing {
    /// Create a ring with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    /// Create a ring holding at most `capacity` frames
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(RingInner {
                frames: VecDeque::with_capacity(capacity),
                capacity,
            }),
        }
    }

    /// Append a frame, evicting the oldest one when the ring is full
    pub fn push(&self, frame: Bytes) {
        let mut inner = self.inner.lock();
        if inner.frames.len() == inner.capacity {
            inner.frames.pop_front();
        }
        inner.frames.push_back(frame);
    }

    /// Ordered copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<Bytes> {
        let inner = self.inner.lock();
        inner.frames.iter().cloned().collect()
    }

    /// Number of frames currently buffered
    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Whether the ring holds no frames
    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }

    /// Maximum number of frames the ring retains
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }
}

impl Default for FrameRing {
    fn default() -> Self {
        Self::new()
    }
}
