//! Graphic-plane display capture through the graphic manager library.
//!
//! Captures the UI layer rather than the video plane. The library was
//! shipped under a versioned soname on some builds and unversioned on
//! others, so opening walks the soname list. The hardware scaler writes a
//! BGRA surface at the requested size, which is then converted to NV12.

use std::ffi::{c_int, c_uint, c_ushort};
use std::ptr;

use tracing::{debug, info, warn};

use crate::capture::convert::bgra_to_nv12;
use crate::capture::native::{EntryPoint, NativeLibrary};
use crate::capture::types::{Nv12Frame, Tier};
use crate::capture::{CaptureBackend, self_test};
use crate::error::CaptureError;

const SONAMES: &[&str] = &["libgm.so.1", "libgm.so"];

/// `GM_CreateSurface` pixel format for 32-bit ARGB (BGRA in memory).
const PIXEL_FORMAT_ARGB: c_uint = 0;

mod status {
    pub const OK: i32 = 0;
    pub const NOT_SUPPORTED: i32 = 5;
    pub const PROTECTED: i32 = 9;
}

#[repr(C)]
#[derive(Debug)]
struct GmSurface {
    surface_id: c_uint,
    bytes_per_pixel: c_uint,
    pitch: c_uint,
    width: c_uint,
    height: c_uint,
    framebuffer: *mut u8,
}

impl Default for GmSurface {
    fn default() -> Self {
        Self {
            surface_id: 0,
            bytes_per_pixel: 0,
            pitch: 0,
            width: 0,
            height: 0,
            framebuffer: ptr::null_mut(),
        }
    }
}

type CreateSurfaceFn = unsafe extern "C" fn(c_uint, c_uint, c_uint, *mut GmSurface) -> c_int;
type CaptureFn = unsafe extern "C" fn(c_uint, *mut c_ushort, *mut c_ushort) -> c_int;
type DestroySurfaceFn = unsafe extern "C" fn(c_uint) -> c_int;

const CREATE_SURFACE: &[&str] = &["GM_CreateSurface"];
const CAPTURE: &[&str] = &["GM_CaptureGraphicScreen", "GM_CaptureGraphicScreenEx"];
const DESTROY_SURFACE: &[&str] = &["GM_DestroySurface"];

/// Tier-2 backend over the graphic manager.
pub struct GraphicBackend {
    library: Option<NativeLibrary>,
    create: EntryPoint<CreateSurfaceFn>,
    grab: EntryPoint<CaptureFn>,
    destroy: EntryPoint<DestroySurfaceFn>,
    surface: Option<GmSurface>,
    initialized: bool,
}

// The surface mapping is owned exclusively and only touched through &mut self.
unsafe impl Send for GraphicBackend {}

impl GraphicBackend {
    pub fn new() -> Self {
        Self {
            library: None,
            create: EntryPoint::Unresolved,
            grab: EntryPoint::Unresolved,
            destroy: EntryPoint::Unresolved,
            surface: None,
            initialized: false,
        }
    }

    fn classify(call: &'static str, code: i32) -> CaptureError {
        match code {
            status::PROTECTED => CaptureError::DrmProtected,
            status::NOT_SUPPORTED => CaptureError::Unsupported(format!("{call} not supported")),
            _ => CaptureError::Native { call, code },
        }
    }

    fn initialize(&mut self) -> Result<(), CaptureError> {
        if self.initialized {
            return Ok(());
        }
        let library = NativeLibrary::open_first(SONAMES)?;
        // SAFETY: the function pointer types above match the library ABI.
        let resolved = unsafe {
            self.create.resolve(&library, CREATE_SURFACE).is_some()
                && self.grab.resolve(&library, CAPTURE).is_some()
                && self.destroy.resolve(&library, DESTROY_SURFACE).is_some()
        };
        if !resolved {
            self.release();
            return Err(CaptureError::Unavailable(format!(
                "{} lacks a required export",
                library.soname()
            )));
        }
        info!(
            soname = library.soname(),
            symbol = self.grab.symbol().unwrap_or("?"),
            "graphic capture initialized"
        );
        self.library = Some(library);
        self.initialized = true;
        Ok(())
    }

    /// Ensure a surface of exactly `width`×`height` exists.
    fn surface_for(&mut self, width: u32, height: u32) -> Result<&GmSurface, CaptureError> {
        if self
            .surface
            .as_ref()
            .is_some_and(|s| s.width != width || s.height != height)
        {
            self.destroy_surface();
        }
        if self.surface.is_none() {
            let EntryPoint::Resolved { func: create, .. } = self.create else {
                return Err(CaptureError::NotInitialized);
            };
            let mut surface = GmSurface::default();
            // SAFETY: `surface` is a valid out-pointer for the call.
            let code = unsafe { create(width, height, PIXEL_FORMAT_ARGB, &mut surface) };
            if code != status::OK || surface.framebuffer.is_null() {
                return Err(Self::classify("GM_CreateSurface", code));
            }
            debug!(width, height, id = surface.surface_id, "created capture surface");
            self.surface = Some(surface);
        }
        let surface = self.surface.as_ref().ok_or(CaptureError::NotInitialized)?;
        if surface.bytes_per_pixel != 4 {
            return Err(CaptureError::Unsupported(format!(
                "{}-byte graphic surface",
                surface.bytes_per_pixel
            )));
        }
        Ok(surface)
    }

    fn destroy_surface(&mut self) {
        if let Some(surface) = self.surface.take() {
            if let EntryPoint::Resolved { func, .. } = self.destroy {
                // SAFETY: the surface id is destroyed exactly once.
                let code = unsafe { func(surface.surface_id) };
                if code != status::OK {
                    warn!(code, "GM_DestroySurface failed");
                }
            }
        }
    }
}

impl Default for GraphicBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for GraphicBackend {
    fn name(&self) -> &'static str {
        "graphic"
    }

    fn priority(&self) -> u8 {
        Tier::GRAPHIC
    }

    fn probe(&self) -> bool {
        NativeLibrary::installed(SONAMES)
    }

    fn test(&mut self) -> bool {
        self_test(self)
    }

    fn capture_into(&mut self, frame: &mut Nv12Frame) -> Result<(), CaptureError> {
        self.initialize()?;
        let EntryPoint::Resolved { func: capture, symbol } = self.grab else {
            return Err(CaptureError::NotInitialized);
        };
        let (width, height) = (frame.width(), frame.height());
        let surface = self.surface_for(width, height)?;
        let (id, pitch, fb) = (surface.surface_id, surface.pitch as usize, surface.framebuffer);

        let (mut out_w, mut out_h): (c_ushort, c_ushort) = (0, 0);
        // SAFETY: the surface is live; out-pointers are valid.
        let code = unsafe { capture(id, &mut out_w, &mut out_h) };
        if code != status::OK {
            return Err(Self::classify(symbol, code));
        }
        let pitch = pitch.max(width as usize * 4);
        // SAFETY: the surface maps `pitch * height` bytes until destroyed.
        let pixels = unsafe { std::slice::from_raw_parts(fb, pitch * height as usize) };
        bgra_to_nv12(pixels, width, height, pitch, frame)
    }

    fn release(&mut self) {
        self.destroy_surface();
        self.create.reset();
        self.grab.reset();
        self.destroy.reset();
        self.library = None;
        if self.initialized {
            debug!("graphic capture released");
        }
        self.initialized = false;
    }
}

impl Drop for GraphicBackend {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_classify() {
        assert!(matches!(
            GraphicBackend::classify("c", status::PROTECTED),
            CaptureError::DrmProtected
        ));
        assert!(GraphicBackend::classify("c", status::NOT_SUPPORTED).is_steady_state());
        assert!(matches!(
            GraphicBackend::classify("c", 1),
            CaptureError::Native { code: 1, .. }
        ));
    }

    #[test]
    fn release_is_idempotent() {
        let mut backend = GraphicBackend::new();
        backend.release();
        backend.release();
        assert!(backend.surface.is_none());
    }
}
