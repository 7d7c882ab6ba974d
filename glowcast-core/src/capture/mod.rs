//! # Capture backends
//!
//! Different device generations expose different native capture entry
//! points, and which ones work can only be learned by probing the running
//! system. Every variant implements [`CaptureBackend`]; the
//! [`BackendSelector`] ranks them by tier, self-tests them, and keeps the
//! first that works.
//!
//! ```text
//! BackendSelector::select_best_method
//!   │  (descending tier)
//!   ├─ VtCaptureBackend     tier 4   libvtcapture   fast full-frame
//!   ├─ DileVtBackend        tier 3   libdile_vt     legacy full-frame
//!   ├─ GraphicBackend       tier 2   libgm          graphic plane
//!   └─ FramebufferBackend   tier 1   /dev/fb0       pixel sampling
//! ```
//!
//! ## Sub-modules
//!
//! | Module        | Purpose                                             |
//! |---------------|-----------------------------------------------------|
//! | `types`       | `Nv12Frame`, `CaptureResult`, `Tier`                |
//! | `native`      | `dlopen` wrapper and cached entry-point bindings    |
//! | `convert`     | RGB → NV12 conversion and NV12 scaling              |
//! | `vtcapture`   | Fast full-frame video capture                       |
//! | `dile_vt`     | Legacy full-frame video capture                     |
//! | `graphic`     | Graphic-plane display capture                       |
//! | `framebuffer` | Pixel-sampling framebuffer fallback                 |
//! | `selector`    | Priority-ordered selection with cleanup             |

pub mod convert;
pub mod dile_vt;
pub mod framebuffer;
pub mod graphic;
pub mod native;
pub mod selector;
pub mod types;
pub mod vtcapture;

// ── Re-exports ───────────────────────────────────────────────────

pub use dile_vt::DileVtBackend;
pub use framebuffer::{FramebufferBackend, FramebufferGeometry};
pub use graphic::GraphicBackend;
pub use selector::{BackendCandidate, BackendHandle, BackendSelector};
pub use types::{CaptureResult, Nv12Frame, Tier};
pub use vtcapture::VtCaptureBackend;

use crate::error::CaptureError;

// ── CaptureBackend ───────────────────────────────────────────────

/// One concrete way of obtaining a display frame.
///
/// Lifecycle: constructed inert → [`probe`](Self::probe) →
/// [`test`](Self::test) → any number of [`capture`](Self::capture) calls →
/// [`release`](Self::release).
pub trait CaptureBackend: Send {
    /// Display identifier.
    fn name(&self) -> &'static str;

    /// Priority tier; higher is tried first. See [`Tier`].
    fn priority(&self) -> u8;

    /// Side-effect-free prerequisite check (library or device presence).
    fn probe(&self) -> bool;

    /// One real capture to validate the backend end to end.
    ///
    /// Faults are logged and reported as `false` so selection can move on.
    fn test(&mut self) -> bool;

    /// Capture one frame into `frame`, initialising lazily if needed.
    ///
    /// The frame's dimensions are the requested output size.
    fn capture_into(&mut self, frame: &mut Nv12Frame) -> Result<(), CaptureError>;

    /// Capture one frame into a freshly allocated buffer.
    fn capture(&mut self, width: u32, height: u32) -> CaptureResult {
        let mut frame = Nv12Frame::new(width, height)?;
        self.capture_into(&mut frame)?;
        Ok(frame)
    }

    /// Free all native resources. Idempotent; must not panic.
    fn release(&mut self);
}

/// Frame size used by backends for their self-test capture.
pub const TEST_WIDTH: u32 = 64;
pub const TEST_HEIGHT: u32 = 48;

/// Shared `test()` body: one capture at the test size, faults logged.
pub(crate) fn self_test(backend: &mut dyn CaptureBackend) -> bool {
    match backend.capture(TEST_WIDTH, TEST_HEIGHT) {
        Ok(_) => {
            tracing::info!(backend = backend.name(), "self-test capture succeeded");
            true
        }
        Err(e) => {
            tracing::warn!(backend = backend.name(), "self-test capture failed: {e}");
            false
        }
    }
}

/// All built-in backends with their default settings, in tier order.
pub fn default_backends() -> Vec<Box<dyn CaptureBackend>> {
    vec![
        Box::new(VtCaptureBackend::new()),
        Box::new(DileVtBackend::new()),
        Box::new(GraphicBackend::new()),
        Box::new(FramebufferBackend::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backends_cover_every_tier() {
        let mut tiers: Vec<u8> = default_backends().iter().map(|b| b.priority()).collect();
        tiers.sort_unstable();
        assert_eq!(
            tiers,
            vec![Tier::FRAMEBUFFER, Tier::GRAPHIC, Tier::DILE_VT, Tier::VTCAPTURE]
        );
    }

    #[test]
    fn default_backend_names_are_unique() {
        let mut names: Vec<&str> = default_backends().iter().map(|b| b.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 4);
    }
}
