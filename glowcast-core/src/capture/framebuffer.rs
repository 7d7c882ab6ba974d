//! Pixel-sampling fallback over the Linux framebuffer device.
//!
//! Works wherever `/dev/fb0` exists, but reads one source pixel per output
//! pixel with a positioned read, so it is far slower than the native
//! backends and only ever sees what the kernel framebuffer holds.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::capture::convert::{Rgb, sample_to_nv12};
use crate::capture::types::{Nv12Frame, Tier};
use crate::capture::{CaptureBackend, self_test};
use crate::error::CaptureError;

const DEFAULT_DEVICE: &str = "/dev/fb0";
const DEFAULT_SYSFS: &str = "/sys/class/graphics/fb0";

// ── FramebufferGeometry ──────────────────────────────────────────

/// Layout of the framebuffer memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferGeometry {
    pub width: u32,
    pub height: u32,
    /// 16 (RGB565) or 32 (BGRA).
    pub bits_per_pixel: u32,
    /// Bytes per row, including padding.
    pub line_length: u32,
}

impl FramebufferGeometry {
    /// Packed geometry (no row padding).
    pub fn packed(width: u32, height: u32, bits_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            bits_per_pixel,
            line_length: width * bits_per_pixel / 8,
        }
    }

    /// Read `virtual_size`, `bits_per_pixel` and `stride` from a sysfs
    /// framebuffer directory.
    pub fn from_sysfs(dir: &Path) -> Result<Self, CaptureError> {
        let read = |name: &str| -> Result<String, CaptureError> {
            Ok(std::fs::read_to_string(dir.join(name))?.trim().to_string())
        };
        let size = read("virtual_size")?;
        let (w, h) = size
            .split_once(',')
            .ok_or_else(|| CaptureError::Unavailable(format!("bad virtual_size {size:?}")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| CaptureError::Unavailable(format!("bad framebuffer value {v:?}: {e}")))
        };
        let (width, height) = (parse(w)?, parse(h)?);
        let bits_per_pixel = parse(&read("bits_per_pixel")?)?;
        let line_length = match read("stride") {
            Ok(stride) => parse(&stride)?,
            Err(_) => width * bits_per_pixel / 8,
        };
        Ok(Self {
            width,
            height,
            bits_per_pixel,
            line_length,
        })
    }

    fn bytes_per_pixel(&self) -> Result<u64, CaptureError> {
        match self.bits_per_pixel {
            16 => Ok(2),
            32 => Ok(4),
            other => Err(CaptureError::Unsupported(format!(
                "{other}-bit framebuffer"
            ))),
        }
    }
}

// ── FramebufferBackend ───────────────────────────────────────────

/// Tier-1 pixel-sampling backend.
pub struct FramebufferBackend {
    device: PathBuf,
    sysfs: PathBuf,
    geometry_override: Option<FramebufferGeometry>,
    file: Option<File>,
    geometry: Option<FramebufferGeometry>,
}

impl FramebufferBackend {
    /// `/dev/fb0` with geometry from sysfs.
    pub fn new() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            sysfs: PathBuf::from(DEFAULT_SYSFS),
            geometry_override: None,
            file: None,
            geometry: None,
        }
    }

    /// A specific device; `geometry` replaces the sysfs lookup when given.
    pub fn with_device(device: impl Into<PathBuf>, geometry: Option<FramebufferGeometry>) -> Self {
        Self {
            device: device.into(),
            geometry_override: geometry,
            ..Self::new()
        }
    }

    fn initialize(&mut self) -> Result<FramebufferGeometry, CaptureError> {
        if let (Some(_), Some(geometry)) = (&self.file, self.geometry) {
            return Ok(geometry);
        }
        let geometry = match self.geometry_override {
            Some(g) => g,
            None => FramebufferGeometry::from_sysfs(&self.sysfs)?,
        };
        geometry.bytes_per_pixel()?;
        self.file = Some(File::open(&self.device)?);
        self.geometry = Some(geometry);
        info!(
            device = %self.device.display(),
            width = geometry.width,
            height = geometry.height,
            bpp = geometry.bits_per_pixel,
            "framebuffer sampling initialized"
        );
        Ok(geometry)
    }
}

impl Default for FramebufferBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for FramebufferBackend {
    fn name(&self) -> &'static str {
        "framebuffer"
    }

    fn priority(&self) -> u8 {
        Tier::FRAMEBUFFER
    }

    fn probe(&self) -> bool {
        self.device.exists()
    }

    fn test(&mut self) -> bool {
        self_test(self)
    }

    fn capture_into(&mut self, frame: &mut Nv12Frame) -> Result<(), CaptureError> {
        let geometry = self.initialize()?;
        let file = self.file.as_ref().ok_or(CaptureError::NotInitialized)?;
        let bpp = geometry.bytes_per_pixel()?;
        let line = u64::from(geometry.line_length);
        let mut px = [0u8; 4];

        sample_to_nv12(frame, geometry.width, geometry.height, |x, y| {
            let offset = u64::from(y) * line + u64::from(x) * bpp;
            let buf = &mut px[..bpp as usize];
            file.read_exact_at(buf, offset)?;
            Ok(match bpp {
                2 => {
                    let v = u16::from_le_bytes([buf[0], buf[1]]);
                    Rgb {
                        r: (((v >> 11) & 0x1f) << 3) as u8,
                        g: (((v >> 5) & 0x3f) << 2) as u8,
                        b: ((v & 0x1f) << 3) as u8,
                    }
                }
                _ => Rgb {
                    b: buf[0],
                    g: buf[1],
                    r: buf[2],
                },
            })
        })
    }

    fn release(&mut self) {
        if self.file.take().is_some() {
            debug!(device = %self.device.display(), "framebuffer released");
        }
        self.geometry = None;
    }
}
