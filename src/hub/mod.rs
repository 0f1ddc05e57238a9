//! Per-channel stream hub
//!
//! A hub owns the UDP ingest path and the fan-out to every HTTP client
//! watching the same channel:
//!
//! ```text
//!  multicast datagrams          Arc<StreamHub>
//!  ───────────────────►  ┌───────────────────────────┐
//!   [receive loop]×N     │ clients: HashMap<conn_id, │
//!        │               │   HubClient { queue }>    │
//!   extract_payload      │ ring, last_frame, state   │
//!        │               └────────────┬──────────────┘
//!        └── broadcast ───────────────┤ try-push, never blocks
//!                     ┌───────────────┼───────────────┐
//!                     ▼               ▼               ▼
//!               [client queue]  [client queue]  [client queue]
//!                     │               │               │
//!                HTTP serve      HTTP serve      HTTP serve
//! ```
//!
//! Frames are `bytes::Bytes`, so the ring and every queue share one
//! allocation per datagram.

pub mod client;
pub mod config;
pub(crate) mod socket;
pub mod stream;

pub use client::{ClientQueue, HubClient};
pub use config::HubConfig;
pub use stream::{HubState, StreamHub};
