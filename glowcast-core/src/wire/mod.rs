//! # Sink protocol
//!
//! One TCP connection to the sink carries every message in the same
//! envelope:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────┐
//! │ length: u32 (BE) │ body: bincode(Request|Reply)  │
//! └──────────────────┴──────────────────────────────┘
//! ```
//!
//! The client registers first (`Request::Register`, reply within
//! [`REGISTER_TIMEOUT`]) and only then submits `Request::Image` frames.
//! Replies to frames are monitored in the background; an error string or a
//! closed socket tears the connection down so the session re-registers.

pub mod client;
pub mod codec;
pub mod message;

pub use client::{Connection, FLUSH_TIMEOUT, REGISTER_TIMEOUT, SinkAddress, WireClient};
pub use codec::{MAX_FRAME_LENGTH, SinkCodec, envelope};
pub use message::{
    DEFAULT_ORIGIN, DURATION_UNBOUNDED, ImageData, PixelFormat, REGISTER_PRIORITY, Reply, Request,
};
