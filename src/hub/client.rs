//! Per-client frame queue
//!
//! Every attached HTTP client owns the read end of a bounded queue; the hub
//! owns the write end. The producer side never blocks: a full queue rejects
//! the new frame and the hub applies its drop/resync policy. The queue is
//! closed exactly once, by the hub, either on explicit detach or when the
//! hub itself closes; a closed queue still drains frames that were already
//! buffered before reporting end-of-stream.

use std::sync::Arc;

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Handle the hub keeps per attached client
#[derive(Clone)]
pub struct HubClient {
    /// Stable connection identifier, unique within the hub
    pub conn_id: String,
    /// The client's frame queue; the hub pushes, the HTTP adapter receives
    pub queue: Arc<ClientQueue>,
}

impl HubClient {
    /// Create a client handle with a fresh queue of the given capacity
    pub fn new(conn_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            conn_id: conn_id.into(),
            queue: Arc::new(ClientQueue::new(capacity)),
        }
    }
}

/// Bounded frame queue between the hub and one HTTP client
pub struct ClientQueue {
    frames: ArrayQueue<Bytes>,
    ready: Notify,
    closed: CancellationToken,
}

impl ClientQueue {
    /// Create a queue holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: ArrayQueue::new(capacity.max(1)),
            ready: Notify::new(),
            closed: CancellationToken::new(),
        }
    }

    /// Non-blocking enqueue. Returns false when the queue is full or closed.
    pub(crate) fn push(&self, frame: Bytes) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        if self.frames.push(frame).is_err() {
            return false;
        }
        self.ready.notify_one();
        true
    }

    /// Evict the oldest queued frame, if any. Used by the resync pulse.
    pub(crate) fn drop_oldest(&self) -> Option<Bytes> {
        self.frames.pop()
    }

    /// Close the queue. Idempotent; wakes any pending receiver.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }

    /// Whether the hub has closed this queue
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Number of frames currently queued
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the queue is currently empty
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Receive the next frame.
    ///
    /// Returns `None` once the queue has been closed and fully drained.
    pub async fn recv(&self) -> Option<Bytes> {
        loop {
            if let Some(frame) = self.frames.pop() {
                return Some(frame);
            }
            if self.closed.is_cancelled() {
                // Frames may have landed between the pop and the check.
                return self.frames.pop();
            }
            tokio::select! {
                _ = self.ready.notified() => {}
                _ = self.closed.cancelled() => {}
            }
        }
    }
}
