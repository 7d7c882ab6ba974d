//! # glowcast-core
//!
//! Capture-and-stream core for the glowcast ambient-lighting client.
//!
//! This crate contains:
//! - **Capture**: the `CaptureBackend` contract, the native backend variants
//!   and `BackendSelector`, which ranks, tests and falls back between them
//! - **Pipeline**: `FramePipeline`, one capture → sanity check → submit cycle
//! - **Session**: `StreamingSession`, the lifecycle state machine and
//!   background capture loop with its consecutive-error budget
//! - **Wire**: `WireClient`, the length-prefixed sink protocol over one TCP
//!   connection with registration handshake
//! - **Error**: `GlowError`, `CaptureError`, `WireError`, the typed
//!   `thiserror`-based error hierarchy

pub mod capture;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{
    BackendHandle, BackendSelector, CaptureBackend, CaptureResult, Nv12Frame, Tier,
};
pub use error::{CaptureError, GlowError, WireError};
pub use pipeline::{CycleError, FramePipeline};
pub use session::{
    ExpectedFailurePolicy, SessionConfig, SessionState, SessionStatus, SessionTimings,
    StreamingSession,
};
pub use wire::{Connection, Reply, Request, SinkAddress, WireClient};
