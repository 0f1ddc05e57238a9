//! Process-wide channel registry
//!
//! The registry deduplicates hubs so that every HTTP client asking for the
//! same channel (same UDP address and interface list) shares one socket set
//! and one receive path. Hubs are created on first request and reaped once
//! their last client leaves.
//!
//! ```text
//!                       Arc<ChannelRegistry>
//!                  ┌──────────────────────────┐
//!                  │ hubs: HashMap<key,       │
//!                  │   Arc<StreamHub>>        │
//!                  └────────────┬─────────────┘
//!                               │ get_or_create
//!          ┌────────────────────┼────────────────────┐
//!          ▼                    ▼                    ▼
//!     [HTTP client]       [HTTP client]       [HTTP client]
//!          └───────── same hub, shared ingest ───────┘
//! ```
//!
//! Keys are md5 fingerprints of `addr` or `addr@if1,if2`; md5 is used as a
//! stable non-cryptographic map key only.

pub mod key;
pub mod store;

pub use key::hub_key;
pub use store::ChannelRegistry;
