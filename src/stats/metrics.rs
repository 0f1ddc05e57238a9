//! Counter and table-size snapshots
//!
//! These are plain point-in-time copies for log lines, admin surfaces and
//! tests; the live counters stay inside the hub.

use crate::hub::stream::HubState;

/// Snapshot of one hub's counters and table sizes
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Datagrams ingested (post RTP extraction)
    pub packet_count: u64,
    /// Frames dropped to client back-pressure
    pub drop_count: u64,
    /// Currently attached clients
    pub client_count: usize,
    /// Frames buffered for late joiners
    pub ring_frames: usize,
    /// Playback state at snapshot time
    pub state: HubState,
}

/// Snapshot of the process-wide registry
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Live hubs currently registered
    pub hub_count: usize,
}
