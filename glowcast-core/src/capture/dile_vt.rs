//! Legacy full-frame video capture through `libdile_vt`.
//!
//! Older firmware only ships the DILE video-texture library. It exposes
//! plain C functions; the frame-grab export was renamed once, so only that
//! entry point carries name variants.

use std::ffi::{c_int, c_void};
use std::ptr::{self, NonNull};

use tracing::{debug, info, warn};

use crate::capture::convert::scale_nv12;
use crate::capture::native::{EntryPoint, NativeLibrary};
use crate::capture::types::{Nv12Frame, Tier};
use crate::capture::{CaptureBackend, self_test};
use crate::error::CaptureError;

const SONAMES: &[&str] = &["libdile_vt.so", "libdile_vt.so.1"];

/// Video path to attach to (main scaler).
const VT_PORT: c_int = 0;

mod status {
    pub const OK: i32 = 0;
    pub const NOT_READY: i32 = -2;
    pub const DRM_PROTECTED: i32 = -3;
    pub const NOT_SUPPORTED: i32 = -4;
}

#[repr(C)]
#[derive(Debug)]
struct DileFrame {
    y_addr: *const u8,
    uv_addr: *const u8,
    width: c_int,
    height: c_int,
    stride: c_int,
}

impl Default for DileFrame {
    fn default() -> Self {
        Self {
            y_addr: ptr::null(),
            uv_addr: ptr::null(),
            width: 0,
            height: 0,
            stride: 0,
        }
    }
}

type CreateFn = unsafe extern "C" fn(c_int) -> *mut c_void;
type OutputStateFn = unsafe extern "C" fn(*mut c_void, c_int) -> c_int;
type GrabFn = unsafe extern "C" fn(*mut c_void, *mut DileFrame) -> c_int;
type DestroyFn = unsafe extern "C" fn(*mut c_void);

const CREATE: &[&str] = &["DILE_VT_Create"];
const OUTPUT_STATE: &[&str] = &["DILE_VT_SetVideoFrameOutputDeviceState"];
const GRAB: &[&str] = &[
    "DILE_VT_GetCurrentVideoFrame",
    "DILE_VT_GetCurrentVideoFrameBuffer",
];
const DESTROY: &[&str] = &["DILE_VT_Destroy"];

/// Tier-3 backend over `libdile_vt`.
pub struct DileVtBackend {
    library: Option<NativeLibrary>,
    grab: EntryPoint<GrabFn>,
    output_state: EntryPoint<OutputStateFn>,
    destroy: EntryPoint<DestroyFn>,
    handle: Option<NonNull<c_void>>,
    initialized: bool,
}

// The handle is owned exclusively and only touched through &mut self.
unsafe impl Send for DileVtBackend {}

impl DileVtBackend {
    pub fn new() -> Self {
        Self {
            library: None,
            grab: EntryPoint::Unresolved,
            output_state: EntryPoint::Unresolved,
            destroy: EntryPoint::Unresolved,
            handle: None,
            initialized: false,
        }
    }

    fn classify(call: &'static str, code: i32) -> CaptureError {
        match code {
            status::NOT_READY => CaptureError::NotInitialized,
            status::DRM_PROTECTED => CaptureError::DrmProtected,
            status::NOT_SUPPORTED => CaptureError::Unsupported(format!("{call} not supported")),
            _ => CaptureError::Native { call, code },
        }
    }

    fn initialize(&mut self) -> Result<(), CaptureError> {
        if self.initialized {
            return Ok(());
        }
        let result = self.try_initialize();
        if result.is_err() {
            self.release();
        }
        result
    }

    fn try_initialize(&mut self) -> Result<(), CaptureError> {
        let library = NativeLibrary::open_first(SONAMES)?;
        let mut create: EntryPoint<CreateFn> = EntryPoint::Unresolved;

        // SAFETY: the function pointer types above match the DILE ABI.
        let create = unsafe { create.resolve(&library, CREATE) }
            .ok_or_else(|| CaptureError::Unavailable("DILE_VT_Create not exported".into()))?;
        // SAFETY: as above.
        unsafe {
            self.grab.resolve(&library, GRAB).ok_or_else(|| {
                CaptureError::Unavailable("no frame-grab export in libdile_vt".into())
            })?;
            self.output_state.resolve(&library, OUTPUT_STATE);
            self.destroy.resolve(&library, DESTROY);
        }
        self.library = Some(library);

        // SAFETY: create returns an owned handle or NULL.
        let handle = NonNull::new(unsafe { create(VT_PORT) })
            .ok_or(CaptureError::Native { call: "DILE_VT_Create", code: -1 })?;
        self.handle = Some(handle);

        if let EntryPoint::Resolved { func, .. } = self.output_state {
            // SAFETY: handle is live.
            let code = unsafe { func(handle.as_ptr(), 1) };
            if code != status::OK {
                return Err(Self::classify("DILE_VT_SetVideoFrameOutputDeviceState", code));
            }
        }
        self.initialized = true;
        info!(symbol = self.grab.symbol().unwrap_or("?"), "dile_vt initialized");
        Ok(())
    }
}

impl Default for DileVtBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for DileVtBackend {
    fn name(&self) -> &'static str {
        "dile_vt"
    }

    fn priority(&self) -> u8 {
        Tier::DILE_VT
    }

    fn probe(&self) -> bool {
        NativeLibrary::installed(SONAMES)
    }

    fn test(&mut self) -> bool {
        self_test(self)
    }

    fn capture_into(&mut self, frame: &mut Nv12Frame) -> Result<(), CaptureError> {
        self.initialize()?;
        let handle = self.handle.ok_or(CaptureError::NotInitialized)?;
        let EntryPoint::Resolved { func: grab, symbol } = self.grab else {
            return Err(CaptureError::NotInitialized);
        };

        let mut raw = DileFrame::default();
        // SAFETY: handle is live while initialized.
        let code = unsafe { grab(handle.as_ptr(), &mut raw) };
        if code != status::OK {
            return Err(Self::classify(symbol, code));
        }
        if raw.y_addr.is_null() || raw.uv_addr.is_null() || raw.width < 2 || raw.height < 2 {
            return Err(CaptureError::Native { call: symbol, code: -1 });
        }
        let stride = raw.stride.max(raw.width) as usize;
        let rows = raw.height as usize;
        // SAFETY: the library keeps the current frame mapped until the next
        // grab; a Y plane spans `stride * height` bytes and UV half that.
        let (y, uv) = unsafe {
            (
                std::slice::from_raw_parts(raw.y_addr, stride * rows),
                std::slice::from_raw_parts(raw.uv_addr, stride * rows / 2),
            )
        };
        scale_nv12(y, uv, raw.width as u32, raw.height as u32, stride, frame)
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let EntryPoint::Resolved { func, .. } = self.output_state {
                // SAFETY: handle still live.
                let code = unsafe { func(handle.as_ptr(), 0) };
                if code != status::OK {
                    warn!(code, "disabling DILE VT output failed");
                }
            }
            if let EntryPoint::Resolved { func, .. } = self.destroy {
                // SAFETY: handle is destroyed exactly once, then forgotten.
                unsafe { func(handle.as_ptr()) };
            }
        }
        self.grab.reset();
        self.output_state.reset();
        self.destroy.reset();
        self.library = None;
        if self.initialized {
            debug!("dile_vt released");
        }
        self.initialized = false;
    }
}

impl Drop for DileVtBackend {
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
            DileVtBackend::classify("g", status::DRM_PROTECTED),
            CaptureError::DrmProtected
        ));
        assert!(matches!(
            DileVtBackend::classify("g", status::NOT_READY),
            CaptureError::NotInitialized
        ));
        assert!(DileVtBackend::classify("g", status::NOT_SUPPORTED).is_steady_state());
        assert!(!DileVtBackend::classify("g", 5).is_steady_state());
    }

    #[test]
    fn release_is_idempotent() {
        let mut backend = DileVtBackend::new();
        backend.release();
        backend.release();
        assert!(backend.handle.is_none());
        assert_eq!(backend.priority(), Tier::DILE_VT);
    }
}
