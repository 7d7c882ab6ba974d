//! Domain-specific error types for glowcast.
//!
//! Capture faults, transport faults and session-level faults each get their
//! own enum so callers can classify them without string matching. Nothing in
//! the capture path panics on a native failure; every fault is typed.

use std::time::Duration;
use thiserror::Error;

/// Faults that end a session run before streaming begins.
#[derive(Debug, Error)]
pub enum GlowError {
    /// The capture buffers could not be set up.
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// No capture backend passed probing and self-test.
    #[error("no working capture backend")]
    NoBackend,

    /// The blocking selection task panicked or was cancelled.
    #[error("backend selection failed: {0}")]
    Selection(String),
}

// ── CaptureError ─────────────────────────────────────────────────

/// Why a capture attempt produced no frame.
///
/// The `Display` text of each variant is the human-readable
/// `error_message` surfaced in session status.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// `capture` was invoked before native state could be initialised.
    #[error("capture backend not initialized")]
    NotInitialized,

    /// The source is DRM-protected and cannot be captured.
    #[error("source is DRM-protected")]
    DrmProtected,

    /// The operation is not supported by this firmware/build.
    #[error("capture unsupported on this build: {0}")]
    Unsupported(String),

    /// A native call failed with an opaque status code.
    #[error("{call} failed with code {code}")]
    Native { call: &'static str, code: i32 },

    /// The backend's library, device or entry point is missing.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend returned a frame in which every byte was zero.
    #[error("captured frame is blank (all bytes zero)")]
    BlankFrame,

    /// Requested dimensions cannot form an NV12 frame.
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Reading a device file failed.
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Expected steady-state conditions (DRM content, unsupported
    /// operation) as opposed to transient faults.
    pub fn is_steady_state(&self) -> bool {
        matches!(self, Self::DrmProtected | Self::Unsupported(_))
    }
}

// ── WireError ────────────────────────────────────────────────────

/// Failures on the sink connection.
#[derive(Debug, Error)]
pub enum WireError {
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// A message body could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The sink did not answer within the deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The peer closed the connection.
    #[error("connection closed by sink")]
    Closed,

    /// The sink answered the registration without granting it.
    #[error("registration rejected by sink")]
    NotRegistered,

    /// The sink replied with an error string.
    #[error("sink error: {0}")]
    Rejected(String),

    /// An image was submitted without a live connection.
    #[error("not connected")]
    NotConnected,
}

impl From<Box<bincode::ErrorKind>> for WireError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        WireError::Encoding(e.to_string())
    }
}
