//! Colour conversion into NV12.
//!
//! Reference CPU implementations: BT.601 limited range, nearest-neighbour
//! scaling. Ambient lighting consumes small frames (tens to a few hundred
//! pixels wide), so the per-pixel cost is dominated by the capture itself.

use crate::capture::types::Nv12Frame;
use crate::error::CaptureError;

/// One sampled source pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// BT.601 limited-range RGB → (Y, U, V).
pub fn rgb_to_yuv(px: Rgb) -> (u8, u8, u8) {
    let (r, g, b) = (i32::from(px.r), i32::from(px.g), i32::from(px.b));
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}

/// Map a destination coordinate onto a source axis of `src_len` pixels.
fn nearest(dst: u32, dst_len: u32, src_len: u32) -> u32 {
    ((u64::from(dst) * u64::from(src_len)) / u64::from(dst_len)) as u32
}

/// Fill `frame` by sampling one source pixel per destination pixel.
///
/// `sample(x, y)` is called with source coordinates. Chroma is the average
/// of each 2×2 block.
pub fn sample_to_nv12<F>(
    frame: &mut Nv12Frame,
    src_width: u32,
    src_height: u32,
    mut sample: F,
) -> Result<(), CaptureError>
where
    F: FnMut(u32, u32) -> Result<Rgb, CaptureError>,
{
    if src_width == 0 || src_height == 0 {
        return Err(CaptureError::InvalidDimensions {
            width: src_width,
            height: src_height,
        });
    }
    let (w, h) = (frame.width(), frame.height());
    let (y_plane, uv_plane) = frame.planes_mut();

    for by in (0..h).step_by(2) {
        for bx in (0..w).step_by(2) {
            let (mut u_sum, mut v_sum) = (0u32, 0u32);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let (x, y) = (bx + dx, by + dy);
                let px = sample(nearest(x, w, src_width), nearest(y, h, src_height))?;
                let (luma, u, v) = rgb_to_yuv(px);
                y_plane[(y * w + x) as usize] = luma;
                u_sum += u32::from(u);
                v_sum += u32::from(v);
            }
            let uv_idx = ((by / 2) * w + bx) as usize;
            uv_plane[uv_idx] = (u_sum / 4) as u8;
            uv_plane[uv_idx + 1] = (v_sum / 4) as u8;
        }
    }
    Ok(())
}

/// Convert a BGRA surface (`stride` bytes per row) into `frame`.
pub fn bgra_to_nv12(
    src: &[u8],
    src_width: u32,
    src_height: u32,
    stride: usize,
    frame: &mut Nv12Frame,
) -> Result<(), CaptureError> {
    let needed = required_len(stride, src_width as usize * 4, src_height);
    if src_width == 0 || stride < src_width as usize * 4 || src.len() < needed {
        return Err(CaptureError::InvalidDimensions {
            width: src_width,
            height: src_height,
        });
    }
    sample_to_nv12(frame, src_width, src_height, |x, y| {
        let off = y as usize * stride + x as usize * 4;
        Ok(Rgb {
            b: src[off],
            g: src[off + 1],
            r: src[off + 2],
        })
    })
}

/// Nearest-neighbour rescale of an NV12 image into `frame`.
pub fn scale_nv12(
    src_y: &[u8],
    src_uv: &[u8],
    src_width: u32,
    src_height: u32,
    stride: usize,
    frame: &mut Nv12Frame,
) -> Result<(), CaptureError> {
    let bad = CaptureError::InvalidDimensions {
        width: src_width,
        height: src_height,
    };
    if src_width < 2
        || src_height < 2
        || stride < src_width as usize
        || src_y.len() < required_len(stride, src_width as usize, src_height)
        || src_uv.len() < required_len(stride, src_width as usize, src_height / 2)
    {
        return Err(bad);
    }

    let (w, h) = (frame.width(), frame.height());
    let (y_plane, uv_plane) = frame.planes_mut();

    for y in 0..h {
        let sy = nearest(y, h, src_height) as usize;
        let row = &src_y[sy * stride..];
        let out = &mut y_plane[(y * w) as usize..((y + 1) * w) as usize];
        for (x, dst) in out.iter_mut().enumerate() {
            *dst = row[nearest(x as u32, w, src_width) as usize];
        }
    }

    let (cw, ch) = (w / 2, h / 2);
    let (src_cw, src_ch) = (src_width / 2, src_height / 2);
    for cy in 0..ch {
        let sy = nearest(cy, ch, src_ch) as usize;
        for cx in 0..cw {
            let sx = nearest(cx, cw, src_cw) as usize;
            let src_off = sy * stride + sx * 2;
            let dst_off = (cy * w + cx * 2) as usize;
            uv_plane[dst_off..dst_off + 2].copy_from_slice(&src_uv[src_off..src_off + 2]);
        }
    }
    Ok(())
}

/// Bytes needed for `rows` rows where the last row may omit its padding.
fn required_len(stride: usize, row_bytes: usize, rows: u32) -> usize {
    match rows {
        0 => 0,
        n => stride * (n as usize - 1) + row_bytes,
    }
}
