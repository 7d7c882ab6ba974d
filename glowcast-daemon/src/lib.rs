//! # glowcast-daemon
//!
//! Long-running process that captures the display with the best backend
//! the device offers and streams NV12 frames to an ambient-lighting sink.
//!
//! - **config**: TOML configuration, converted into the core
//!   `SessionConfig`
//! - **service**: starts the `StreamingSession`, logs status on an
//!   interval and stops it on shutdown

pub mod config;
pub mod service;
