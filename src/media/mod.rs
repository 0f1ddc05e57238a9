//! Media handling for the fan-out hub
//!
//! This module provides:
//! - RTP payload extraction for RTP-encapsulated MPEG-TS datagrams
//! - Frame ring buffering for late-joiner support

pub mod ring;
pub mod rtp;

pub use ring::FrameRing;
pub use rtp::extract_payload;
