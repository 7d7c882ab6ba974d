//! Dynamic loading of vendor capture libraries.
//!
//! The exported symbol names of the vendor libraries vary between firmware
//! builds, so each entry point is described by an ordered list of candidate
//! names. An [`EntryPoint`] tries them once, on first use, and then keeps
//! the binding for the life of the backend.
//!
//! # Safety
//!
//! All `dlopen`/`dlsym`/`dlclose` calls are confined to this module. Casting
//! a resolved address to a function pointer is the caller's promise about
//! the symbol's signature, which is why [`EntryPoint::resolve`] is `unsafe`.

use std::ffi::{CStr, CString, c_void};
use std::path::Path;
use std::ptr::NonNull;

use tracing::debug;

use crate::error::CaptureError;

/// Default loader directories searched by [`NativeLibrary::installed`],
/// after any `LD_LIBRARY_PATH` entries.
pub const LIBRARY_DIRS: &[&str] = &[
    "/usr/lib",
    "/lib",
    "/usr/local/lib",
    "/usr/lib32",
    "/usr/lib/arm-linux-gnueabi",
    "/usr/lib/arm-linux-gnueabihf",
    "/lib/arm-linux-gnueabihf",
    "/usr/lib/aarch64-linux-gnu",
    "/lib/aarch64-linux-gnu",
    "/usr/lib/x86_64-linux-gnu",
    "/lib/x86_64-linux-gnu",
];

// ── NativeLibrary ────────────────────────────────────────────────

/// An open shared library, closed on drop.
pub struct NativeLibrary {
    handle: NonNull<c_void>,
    soname: &'static str,
}

// The handle is only used for dlsym/dlclose, which are thread-safe.
unsafe impl Send for NativeLibrary {}

impl NativeLibrary {
    /// Whether any of `sonames` is present in a directory `dlopen` would
    /// search: `LD_LIBRARY_PATH` first, then [`LIBRARY_DIRS`].
    ///
    /// Does not load anything.
    pub fn installed(sonames: &[&str]) -> bool {
        let ld_path = std::env::var("LD_LIBRARY_PATH").ok();
        let dirs = search_dirs(ld_path.as_deref());
        Self::installed_in(&dirs, sonames)
    }

    pub fn installed_in(dirs: &[&str], sonames: &[&str]) -> bool {
        sonames
            .iter()
            .any(|name| dirs.iter().any(|dir| Path::new(dir).join(name).is_file()))
    }

    /// Open the first of `sonames` that loads.
    pub fn open_first(sonames: &[&'static str]) -> Result<Self, CaptureError> {
        let mut last_error = String::from("no candidates");
        for &soname in sonames {
            match Self::open(soname) {
                Ok(lib) => {
                    debug!(soname, "loaded capture library");
                    return Ok(lib);
                }
                Err(e) => {
                    debug!(soname, "dlopen failed: {e}");
                    last_error = e;
                }
            }
        }
        Err(CaptureError::Unavailable(format!(
            "none of {sonames:?} could be loaded: {last_error}"
        )))
    }

    fn open(soname: &'static str) -> Result<Self, String> {
        let c_name = CString::new(soname).map_err(|e| e.to_string())?;
        // SAFETY: `c_name` is a valid NUL-terminated string for the call.
        let handle = unsafe { libc::dlopen(c_name.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        NonNull::new(handle)
            .map(|handle| Self { handle, soname })
            .ok_or_else(last_dl_error)
    }

    /// The soname this library was opened under.
    pub fn soname(&self) -> &'static str {
        self.soname
    }

    /// Raw address of `symbol`, if exported.
    pub fn symbol_address(&self, symbol: &str) -> Option<NonNull<c_void>> {
        let c_name = CString::new(symbol).ok()?;
        // SAFETY: the handle is live until drop; `c_name` is NUL-terminated.
        NonNull::new(unsafe { libc::dlsym(self.handle.as_ptr(), c_name.as_ptr()) })
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful dlopen and is closed once.
        if unsafe { libc::dlclose(self.handle.as_ptr()) } != 0 {
            debug!(soname = self.soname, "dlclose failed: {}", last_dl_error());
        }
    }
}

/// Loader search order for a given `LD_LIBRARY_PATH` value.
fn search_dirs(ld_library_path: Option<&str>) -> Vec<&str> {
    ld_library_path
        .unwrap_or_default()
        .split(':')
        .filter(|dir| !dir.is_empty())
        .chain(LIBRARY_DIRS.iter().copied())
        .collect()
}

fn last_dl_error() -> String {
    // SAFETY: dlerror returns NULL or a thread-local NUL-terminated string.
    unsafe {
        let msg = libc::dlerror();
        if msg.is_null() {
            "unknown dynamic loader error".to_string()
        } else {
            CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    }
}

// ── EntryPoint ───────────────────────────────────────────────────

/// A lazily resolved native entry point.
///
/// ```text
/// Unresolved ──resolve──► Resolved { symbol, func }
///      │
///      └──────────────► Exhausted   (no candidate exported)
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub enum EntryPoint<F> {
    #[default]
    Unresolved,
    Resolved {
        symbol: &'static str,
        func: F,
    },
    Exhausted,
}

impl<F: Copy> EntryPoint<F> {
    /// Resolve against `lib`, trying `candidates` in order on first use.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C"` function pointer type whose signature
    /// matches every name in `candidates`.
    pub unsafe fn resolve(
        &mut self,
        lib: &NativeLibrary,
        candidates: &[&'static str],
    ) -> Option<F> {
        assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<*mut c_void>(),
            "entry point type must be pointer-sized"
        );
        self.resolve_with(candidates, |symbol| {
            lib.symbol_address(symbol)
                // SAFETY: size checked above; signature promised by caller.
                .map(|addr| unsafe { std::mem::transmute_copy::<*mut c_void, F>(&addr.as_ptr()) })
        })
    }

    /// Resolve through an arbitrary lookup; the first hit is committed.
    pub fn resolve_with(
        &mut self,
        candidates: &[&'static str],
        mut lookup: impl FnMut(&'static str) -> Option<F>,
    ) -> Option<F> {
        match *self {
            Self::Resolved { func, .. } => Some(func),
            Self::Exhausted => None,
            Self::Unresolved => {
                for &symbol in candidates {
                    if let Some(func) = lookup(symbol) {
                        debug!(symbol, "resolved entry point");
                        *self = Self::Resolved { symbol, func };
                        return Some(func);
                    }
                }
                debug!(?candidates, "no entry point variant exported");
                *self = Self::Exhausted;
                None
            }
        }
    }

    /// Name of the committed symbol, if resolved.
    pub fn symbol(&self) -> Option<&'static str> {
        match self {
            Self::Resolved { symbol, .. } => Some(symbol),
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }

    /// Forget the binding (the library it pointed into is being closed).
    pub fn reset(&mut self) {
        *self = Self::Unresolved;
    }
}
