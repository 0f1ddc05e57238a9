//! Statistics snapshots for hubs and the channel registry

pub mod metrics;

pub use metrics::{HubStats, RegistryStats};
