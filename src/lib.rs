//! Multicast UDP → HTTP live-streaming fan-out for MPEG-TS
//!
//! `tshub` ingests RTP-encapsulated or raw MPEG-TS datagrams from IPv4
//! multicast groups (with a unicast fallback), strips RTP framing, and
//! rebroadcasts the payload to any number of HTTP clients watching the
//! same channel. A process-wide registry deduplicates channels so N
//! clients share one socket set and one receive path.
//!
//! # Architecture
//!
//! ```text
//! UDP datagrams ──► receive loops ──► extract_payload ──► broadcast
//!                                                            │
//!                     ring (late-joiner priming) ◄───────────┤
//!                                                            ▼
//!                                              per-client bounded queues
//!                                                            │
//!                                                    HTTP serve loops
//! ```
//!
//! A slow client never stalls the hub: a full queue drops the new frame,
//! and every 100th drop triggers a resync pulse that replaces the client's
//! oldest queued frame with the most recent one.
//!
//! # Example
//!
//! ```no_run
//! use tshub::ChannelRegistry;
//!
//! # async fn serve(headers: axum::http::HeaderMap) -> tshub::Result<axum::response::Response> {
//! let registry = ChannelRegistry::new();
//! let hub = registry.get_or_create("239.0.0.1:1234", &[]).await?;
//! let response = tshub::serve_stream(hub, &headers, "video/mp2t", None).await;
//! # Ok(response)
//! # }
//! ```

pub mod error;
pub mod http;
pub mod hub;
pub mod media;
pub mod registry;
pub mod stats;

pub use error::{HubError, Result};
pub use http::{serve_stream, ActivityCallback};
pub use hub::{ClientQueue, HubClient, HubConfig, HubState, StreamHub};
pub use media::{extract_payload, FrameRing};
pub use registry::{hub_key, ChannelRegistry};
pub use stats::{HubStats, RegistryStats};
