//! Frame types shared by every capture backend.
//!
//! These are **internal** frame representations. The serialisable wire
//! type is [`crate::wire::ImageData`], which borrows from an [`Nv12Frame`].

use crate::error::CaptureError;

// ── Tier ─────────────────────────────────────────────────────────

/// Priority tiers of the known backend families. Higher is tried first.
pub struct Tier;

impl Tier {
    /// Fast full-frame video capture.
    pub const VTCAPTURE: u8 = 4;
    /// Legacy full-frame video capture.
    pub const DILE_VT: u8 = 3;
    /// Alternate display (graphic plane) capture.
    pub const GRAPHIC: u8 = 2;
    /// Pixel-sampling fallback.
    pub const FRAMEBUFFER: u8 = 1;
}

// ── Nv12Frame ────────────────────────────────────────────────────

/// A planar 4:2:0 frame with interleaved chroma.
///
/// `y` holds `width * height` luma bytes; `uv` holds `width * height / 2`
/// bytes of U/V pairs at half horizontal and vertical resolution. Both
/// strides equal `width`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nv12Frame {
    width: u32,
    height: u32,
    y: Vec<u8>,
    uv: Vec<u8>,
}

impl Nv12Frame {
    /// Allocate a zeroed frame.
    ///
    /// Dimensions must be non-zero and even so the chroma plane tiles
    /// exactly.
    pub fn new(width: u32, height: u32) -> Result<Self, CaptureError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(CaptureError::InvalidDimensions { width, height });
        }
        let luma = width as usize * height as usize;
        Ok(Self {
            width,
            height,
            y: vec![0; luma],
            uv: vec![0; luma / 2],
        })
    }

    /// Build a frame from existing planes, checking their sizes.
    pub fn from_planes(
        width: u32,
        height: u32,
        y: Vec<u8>,
        uv: Vec<u8>,
    ) -> Result<Self, CaptureError> {
        let mut frame = Self::new(width, height)?;
        if y.len() != frame.y.len() || uv.len() != frame.uv.len() {
            return Err(CaptureError::InvalidDimensions { width, height });
        }
        frame.y = y;
        frame.uv = uv;
        Ok(frame)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn y(&self) -> &[u8] {
        &self.y
    }

    pub fn uv(&self) -> &[u8] {
        &self.uv
    }

    /// Mutable access to both planes at once, for backends writing in place.
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut self.y, &mut self.uv)
    }

    /// `true` when every byte of both planes is zero.
    pub fn is_blank(&self) -> bool {
        self.y.iter().all(|&b| b == 0) && self.uv.iter().all(|&b| b == 0)
    }

    /// Total payload bytes across both planes.
    pub fn byte_len(&self) -> usize {
        self.y.len() + self.uv.len()
    }
}

// ── CaptureResult ────────────────────────────────────────────────

/// Outcome of one capture attempt: a frame, or the reason there is none.
pub type CaptureResult = Result<Nv12Frame, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_sizes_follow_dimensions() {
        let frame = Nv12Frame::new(64, 48).unwrap();
        assert_eq!(frame.y().len(), 3072);
        assert_eq!(frame.uv().len(), 1536);
        assert_eq!(frame.byte_len(), 4608);
    }

    #[test]
    fn odd_or_zero_dimensions_rejected() {
        assert!(Nv12Frame::new(0, 48).is_err());
        assert!(Nv12Frame::new(63, 48).is_err());
        assert!(Nv12Frame::new(64, 47).is_err());
    }

    #[test]
    fn from_planes_checks_lengths() {
        assert!(Nv12Frame::from_planes(4, 2, vec![1; 8], vec![2; 4]).is_ok());
        assert!(Nv12Frame::from_planes(4, 2, vec![1; 7], vec![2; 4]).is_err());
        assert!(Nv12Frame::from_planes(4, 2, vec![1; 8], vec![2; 8]).is_err());
    }

    #[test]
    fn blank_detection() {
        let mut frame = Nv12Frame::new(4, 2).unwrap();
        assert!(frame.is_blank());
        frame.planes_mut().1[3] = 1;
        assert!(!frame.is_blank());
    }

    #[test]
    fn tiers_are_distinct_and_ordered() {
        assert!(Tier::VTCAPTURE > Tier::DILE_VT);
        assert!(Tier::DILE_VT > Tier::GRAPHIC);
        assert!(Tier::GRAPHIC > Tier::FRAMEBUFFER);
    }
}
