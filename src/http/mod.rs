//! HTTP streaming adapter
//!
//! Bridges one HTTP request to one hub client: attach, serve the frame
//! stream with the channel's flush cadence, detach on every exit path.
//! Routing, authentication and session tracking live outside this crate;
//! the adapter only takes the request headers, a content type and an
//! optional liveness callback.

pub mod serve;

pub use serve::{serve_stream, ActivityCallback};
