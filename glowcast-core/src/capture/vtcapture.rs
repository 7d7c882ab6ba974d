//! Fast full-frame video capture through `libvtcapture`.
//!
//! The driver hands out NV12 planes of the decoded video plane directly, so
//! a capture is a buffer lookup plus a rescale. The library's exports differ
//! between firmware builds (plain C wrappers on newer builds, mangled C++
//! names on older ones); every entry point is therefore resolved from a list
//! of name variants on first use.
//!
//! # Safety
//!
//! All unsafe FFI calls are confined to this struct.

use std::ffi::{c_char, c_int, c_void};
use std::ptr::{self, NonNull};

use tracing::{debug, info, warn};

use crate::capture::convert::scale_nv12;
use crate::capture::native::{EntryPoint, NativeLibrary};
use crate::capture::types::{Nv12Frame, Tier};
use crate::capture::{CaptureBackend, self_test};
use crate::error::CaptureError;

const SONAMES: &[&str] = &["libvtcapture.so.1", "libvtcapture.so"];

/// Caller identity passed to the driver.
const CALLER: &[u8] = b"glowcast\0";

/// Driver status codes.
mod status {
    pub const OK: i32 = 0;
    pub const NOT_INITIALIZED: i32 = 3;
    pub const DRM_PROTECTED: i32 = 11;
    pub const UNSUPPORTED: i32 = 17;
}

// ── Native shapes ────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug)]
struct VtBufferInfo {
    y_addr: *const u8,
    uv_addr: *const u8,
    y_size: c_int,
    uv_size: c_int,
    width: c_int,
    height: c_int,
    stride: c_int,
}

impl Default for VtBufferInfo {
    fn default() -> Self {
        Self {
            y_addr: ptr::null(),
            uv_addr: ptr::null(),
            y_size: 0,
            uv_size: 0,
            width: 0,
            height: 0,
            stride: 0,
        }
    }
}

type CreateFn = unsafe extern "C" fn() -> *mut c_void;
type InitFn = unsafe extern "C" fn(*mut c_void, *const c_char, *mut c_char) -> c_int;
type ClientFn = unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int;
type BufferFn = unsafe extern "C" fn(*mut c_void, *const c_char, *mut VtBufferInfo) -> c_int;
type FinalizeFn = unsafe extern "C" fn(*mut c_void) -> c_int;

const CREATE: &[&str] = &["vtCapture_create", "_Z16vtCapture_createv"];
const INIT: &[&str] = &["vtCapture_init", "_Z14vtCapture_initP16_VT_DRIVER_T_PKcPc"];
const START: &[&str] = &["vtCapture_start", "_Z15vtCapture_startP16_VT_DRIVER_T_PKc"];
const BUFFER: &[&str] = &[
    "vtCapture_currentCaptureBuffInfo",
    "_Z32vtCapture_currentCaptureBuffInfoP16_VT_DRIVER_T_PKcP18_VT_BUFFER_INFO_T",
    "vtCapture_currentCaptureBuffInfo2",
];
const STOP: &[&str] = &["vtCapture_stop", "_Z14vtCapture_stopP16_VT_DRIVER_T_PKc"];
const FINALIZE: &[&str] = &["vtCapture_finalize", "_Z18vtCapture_finalizeP16_VT_DRIVER_T"];

#[derive(Default)]
struct VtApi {
    create: EntryPoint<CreateFn>,
    init: EntryPoint<InitFn>,
    start: EntryPoint<ClientFn>,
    buffer: EntryPoint<BufferFn>,
    stop: EntryPoint<ClientFn>,
    finalize: EntryPoint<FinalizeFn>,
}

impl VtApi {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

// ── VtCaptureBackend ─────────────────────────────────────────────

/// Tier-4 backend over `libvtcapture`.
pub struct VtCaptureBackend {
    library: Option<NativeLibrary>,
    api: VtApi,
    driver: Option<NonNull<c_void>>,
    client_id: [c_char; 128],
    started: bool,
    initialized: bool,
}

// The driver pointer is owned exclusively and only touched through &mut self.
unsafe impl Send for VtCaptureBackend {}

impl VtCaptureBackend {
    pub fn new() -> Self {
        Self {
            library: None,
            api: VtApi::default(),
            driver: None,
            client_id: [0; 128],
            started: false,
            initialized: false,
        }
    }

    fn classify(call: &'static str, code: i32) -> CaptureError {
        match code {
            status::NOT_INITIALIZED => CaptureError::NotInitialized,
            status::DRM_PROTECTED => CaptureError::DrmProtected,
            status::UNSUPPORTED => CaptureError::Unsupported(format!("{call} reported code {code}")),
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
        let missing = |what: &str| CaptureError::Unavailable(format!("libvtcapture lacks {what}"));

        // SAFETY: the function pointer types above match the driver ABI.
        let (create, init, start) = unsafe {
            (
                self.api.create.resolve(&library, CREATE).ok_or_else(|| missing("create"))?,
                self.api.init.resolve(&library, INIT).ok_or_else(|| missing("init"))?,
                self.api.start.resolve(&library, START).ok_or_else(|| missing("start"))?,
            )
        };
        // SAFETY: as above.
        unsafe {
            self.api.buffer.resolve(&library, BUFFER).ok_or_else(|| missing("buffer info"))?;
            self.api.stop.resolve(&library, STOP);
            self.api.finalize.resolve(&library, FINALIZE);
        }
        self.library = Some(library);

        // SAFETY: create takes no arguments and returns an owned driver.
        let driver = NonNull::new(unsafe { create() })
            .ok_or(CaptureError::Native { call: "vtCapture_create", code: -1 })?;
        self.driver = Some(driver);

        // SAFETY: driver is live; CALLER is NUL-terminated; client_id has
        // room for the driver's identifier.
        let code = unsafe {
            init(
                driver.as_ptr(),
                CALLER.as_ptr().cast(),
                self.client_id.as_mut_ptr(),
            )
        };
        if code != status::OK {
            return Err(Self::classify("vtCapture_init", code));
        }

        // SAFETY: client_id was filled in by init.
        let code = unsafe { start(driver.as_ptr(), self.client_id.as_ptr()) };
        if code != status::OK {
            return Err(Self::classify("vtCapture_start", code));
        }
        self.started = true;
        self.initialized = true;
        info!(
            symbol = self.api.buffer.symbol().unwrap_or("?"),
            "vtcapture initialized"
        );
        Ok(())
    }
}

impl Default for VtCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for VtCaptureBackend {
    fn name(&self) -> &'static str {
        "vtcapture"
    }

    fn priority(&self) -> u8 {
        Tier::VTCAPTURE
    }

    fn probe(&self) -> bool {
        NativeLibrary::installed(SONAMES)
    }

    fn test(&mut self) -> bool {
        self_test(self)
    }

    fn capture_into(&mut self, frame: &mut Nv12Frame) -> Result<(), CaptureError> {
        self.initialize()?;
        let driver = self.driver.ok_or(CaptureError::NotInitialized)?;
        let buffer = match self.api.buffer {
            EntryPoint::Resolved { func, .. } => func,
            _ => return Err(CaptureError::NotInitialized),
        };

        let mut info = VtBufferInfo::default();
        // SAFETY: driver and client id are live while initialized.
        let code = unsafe { buffer(driver.as_ptr(), self.client_id.as_ptr(), &mut info) };
        if code != status::OK {
            return Err(Self::classify("vtCapture_currentCaptureBuffInfo", code));
        }
        if info.y_addr.is_null() || info.uv_addr.is_null() || info.width <= 0 || info.height <= 0 {
            return Err(CaptureError::Native {
                call: "vtCapture_currentCaptureBuffInfo",
                code: -1,
            });
        }
        let stride = info.stride.max(info.width) as usize;
        let y_len = (info.y_size.max(0) as usize).min(stride * info.height as usize);
        let uv_len = (info.uv_size.max(0) as usize).min(stride * info.height as usize / 2);

        // SAFETY: the driver guarantees both planes stay mapped until the
        // next buffer query; lengths are clamped to the reported sizes.
        let (y, uv) = unsafe {
            (
                std::slice::from_raw_parts(info.y_addr, y_len),
                std::slice::from_raw_parts(info.uv_addr, uv_len),
            )
        };
        scale_nv12(y, uv, info.width as u32, info.height as u32, stride, frame)
    }

    fn release(&mut self) {
        if let Some(driver) = self.driver.take() {
            if self.started {
                if let EntryPoint::Resolved { func: stop, .. } = self.api.stop {
                    // SAFETY: driver/client id are still live here.
                    let code = unsafe { stop(driver.as_ptr(), self.client_id.as_ptr()) };
                    if code != status::OK {
                        warn!(code, "vtCapture_stop failed");
                    }
                }
            }
            if let EntryPoint::Resolved { func: finalize, .. } = self.api.finalize {
                // SAFETY: driver is finalized exactly once, then forgotten.
                let code = unsafe { finalize(driver.as_ptr()) };
                if code != status::OK {
                    warn!(code, "vtCapture_finalize failed");
                }
            }
        }
        self.api.reset();
        self.library = None;
        self.client_id = [0; 128];
        self.started = false;
        if self.initialized {
            debug!("vtcapture released");
        }
        self.initialized = false;
    }
}

impl Drop for VtCaptureBackend {
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
            VtCaptureBackend::classify("c", status::DRM_PROTECTED),
            CaptureError::DrmProtected
        ));
        assert!(matches!(
            VtCaptureBackend::classify("c", status::NOT_INITIALIZED),
            CaptureError::NotInitialized
        ));
        assert!(VtCaptureBackend::classify("c", status::UNSUPPORTED).is_steady_state());
        assert!(matches!(
            VtCaptureBackend::classify("c", -9),
            CaptureError::Native { code: -9, .. }
        ));
    }

    #[test]
    fn release_without_init_is_harmless() {
        let mut backend = VtCaptureBackend::new();
        backend.release();
        backend.release();
        assert!(!backend.initialized);
    }

    #[test]
    fn capture_without_library_fails_cleanly() {
        if VtCaptureBackend::new().probe() {
            return;
        }
        let mut backend = VtCaptureBackend::new();
        let err = backend.capture(64, 48).unwrap_err();
        assert!(matches!(err, CaptureError::Unavailable(_)));
        assert!(!backend.test());
    }
}
