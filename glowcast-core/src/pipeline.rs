//! One capture → sanity check → submit cycle.
//!
//! The pipeline keeps a single [`Nv12Frame`] allocated for its whole life
//! and has the selected backend write into it every cycle. The outgoing body
//! is encoded into a reused buffer as well. The native call runs on the
//! blocking pool, directly against the backend; encoding and queueing happen
//! back on the async side.

use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinError;

use crate::capture::{BackendHandle, Nv12Frame};
use crate::error::{CaptureError, WireError};
use crate::wire::{Request, WireClient};

// ── CycleError ───────────────────────────────────────────────────

/// Why one pipeline cycle failed.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Transport(#[from] WireError),

    /// The backend panicked inside the native call.
    #[error("capture panicked: {0}")]
    Panicked(String),
}

impl CycleError {
    /// DRM-protected or unsupported-operation capture failures.
    pub fn is_steady_state(&self) -> bool {
        matches!(self, CycleError::Capture(e) if e.is_steady_state())
    }

    fn from_join(e: JoinError) -> Self {
        if !e.is_panic() {
            return CycleError::Panicked(e.to_string());
        }
        let payload = e.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        CycleError::Panicked(message)
    }
}

// ── FramePipeline ────────────────────────────────────────────────

pub struct FramePipeline {
    backend: BackendHandle,
    frame: Arc<Mutex<Nv12Frame>>,
    body: Mutex<BytesMut>,
}

impl FramePipeline {
    /// Allocate the capture buffers for `width`×`height`.
    pub fn new(backend: BackendHandle, width: u32, height: u32) -> Result<Self, CaptureError> {
        Ok(Self {
            backend,
            frame: Arc::new(Mutex::new(Nv12Frame::new(width, height)?)),
            body: Mutex::new(BytesMut::new()),
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.lock().name()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let frame = self.frame.lock();
        (frame.width(), frame.height())
    }

    /// Copy of the most recent frame.
    pub fn snapshot(&self) -> Nv12Frame {
        self.frame.lock().clone()
    }

    /// Capture into the persistent buffers and reject an all-zero result.
    pub async fn capture(&self) -> Result<(), CycleError> {
        let backend = Arc::clone(&self.backend);
        let frame = Arc::clone(&self.frame);
        let outcome = tokio::task::spawn_blocking(move || {
            let mut backend = backend.lock();
            let mut frame = frame.lock();
            backend.capture_into(&mut frame)?;
            if frame.is_blank() {
                return Err(CaptureError::BlankFrame);
            }
            Ok(())
        })
        .await;

        match outcome {
            Ok(result) => result.map_err(CycleError::from),
            Err(e) => Err(CycleError::from_join(e)),
        }
    }

    /// One full cycle: capture, then queue the frame on `client`.
    pub async fn run_cycle(&self, client: &WireClient) -> Result<(), CycleError> {
        self.capture().await?;
        let body = {
            let frame = self.frame.lock();
            let mut scratch = self.body.lock();
            Request::image(&frame).encode_into(&mut scratch)?
        };
        client.send_encoded(body).await?;
        Ok(())
    }
}
