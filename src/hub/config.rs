//! Hub configuration

use std::time::Duration;

use crate::media::ring::DEFAULT_RING_CAPACITY;

/// Configuration options for a stream hub and its HTTP serving cadence
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames retained in the late-joiner ring
    pub ring_capacity: usize,

    /// Per-client frame queue capacity
    pub client_queue_capacity: usize,

    /// Capacity of the attach/detach control queues
    pub control_queue_capacity: usize,

    /// Kernel receive buffer requested per socket (best effort)
    pub recv_buffer_bytes: usize,

    /// Scratch buffer size for one datagram read
    pub read_buffer_bytes: usize,

    /// Bytes accumulated before a chunk is pushed to an HTTP client
    pub flush_threshold_bytes: usize,

    /// How often a non-empty accumulator is flushed regardless of size
    pub flush_interval: Duration,

    /// How often the liveness callback fires while serving
    pub activity_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            client_queue_capacity: 4096,
            control_queue_capacity: 1024,
            recv_buffer_bytes: 16 * 1024 * 1024, // 16 MiB
            read_buffer_bytes: 64 * 1024,
            flush_threshold_bytes: 128 * 1024,
            flush_interval: Duration::from_millis(50),
            activity_interval: Duration::from_secs(5),
        }
    }
}

impl HubConfig {
    /// Set the ring capacity
    pub fn ring_capacity(mut self, frames: usize) -> Self {
        self.ring_capacity = frames.max(1);
        self
    }

    /// Set the per-client queue capacity
    pub fn client_queue_capacity(mut self, frames: usize) -> Self {
        self.client_queue_capacity = frames.max(1);
        self
    }

    /// Set the requested kernel receive buffer size
    pub fn recv_buffer_bytes(mut self, bytes: usize) -> Self {
        self.recv_buffer_bytes = bytes;
        self
    }

    /// Set the flush threshold for HTTP serving
    pub fn flush_threshold_bytes(mut self, bytes: usize) -> Self {
        self.flush_threshold_bytes = bytes.max(1);
        self
    }

    /// Set the flush ticker interval for HTTP serving
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the liveness callback interval for HTTP serving
    pub fn activity_interval(mut self, interval: Duration) -> Self {
        self.activity_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();

        assert_eq!(config.ring_capacity, 8192);
        assert_eq!(config.client_queue_capacity, 4096);
        assert_eq!(config.control_queue_capacity, 1024);
        assert_eq!(config.recv_buffer_bytes, 16 * 1024 * 1024);
        assert_eq!(config.read_buffer_bytes, 64 * 1024);
        assert_eq!(config.flush_threshold_bytes, 128 * 1024);
        assert_eq!(config.flush_interval, Duration::from_millis(50));
        assert_eq!(config.activity_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_builder_chaining() {
        let config = HubConfig::default()
            .ring_capacity(64)
            .client_queue_capacity(16)
            .flush_threshold_bytes(1024)
            .flush_interval(Duration::from_millis(10))
            .activity_interval(Duration::from_secs(1));

        assert_eq!(config.ring_capacity, 64);
        assert_eq!(config.client_queue_capacity, 16);
        assert_eq!(config.flush_threshold_bytes, 1024);
        assert_eq!(config.flush_interval, Duration::from_millis(10));
        assert_eq!(config.activity_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_clamps_zero_capacities() {
        let config = HubConfig::default()
            .ring_capacity(0)
            .client_queue_capacity(0)
            .flush_threshold_bytes(0);

        assert_eq!(config.ring_capacity, 1);
        assert_eq!(config.client_queue_capacity, 1);
        assert_eq!(config.flush_threshold_bytes, 1);
    }
}
