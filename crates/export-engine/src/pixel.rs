//! RGBA to 4:2:0 pixel conversion.
//!
//! Output layout is a full-resolution Y plane followed by interleaved U/V
//! pairs (one pair per 2x2 luma block, U first), which is what encoders
//! commonly call NV12 / YUV420 semi-planar.

use snapcut_common::error::{SnapcutError, SnapcutResult};

/// Pixel layout of a pooled frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel, R G B A.
    Rgba,
    /// Y plane followed by interleaved U/V at quarter resolution.
    Yuv420SemiPlanar,
}

impl PixelFormat {
    /// Bytes needed for one `width x height` frame.
    pub fn frame_len(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Rgba => pixels * 4,
            Self::Yuv420SemiPlanar => pixels * 3 / 2,
        }
    }
}

#[inline]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// BT.601 studio-swing luma.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    clamp_u8(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16)
}

/// BT.601 chroma pair `(U, V)`.
#[inline]
pub fn chroma(r: u8, g: u8, b: u8) -> (u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (clamp_u8(u), clamp_u8(v))
}

/// Stateless RGBA to YUV420 converter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelConverter;

impl PixelConverter {
    /// Convert into a freshly allocated buffer of `width * height * 3 / 2` bytes.
    pub fn convert(&self, width: u32, height: u32, rgba: &[u8]) -> SnapcutResult<Vec<u8>> {
        let mut out = vec![0u8; PixelFormat::Yuv420SemiPlanar.frame_len(width, height)];
        self.convert_into(width, height, rgba, &mut out)?;
        Ok(out)
    }

    /// Convert into a caller-provided buffer, typically taken from a pool.
    pub fn convert_into(
        &self,
        width: u32,
        height: u32,
        rgba: &[u8],
        out: &mut [u8],
    ) -> SnapcutResult<()> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(SnapcutError::conversion(format!(
                "frame {width}x{height} must have non-zero even dimensions"
            )));
        }
        let expected_in = PixelFormat::Rgba.frame_len(width, height);
        if rgba.len() != expected_in {
            return Err(SnapcutError::conversion(format!(
                "RGBA buffer is {} bytes, expected {expected_in} for {width}x{height}",
                rgba.len()
            )));
        }
        let expected_out = PixelFormat::Yuv420SemiPlanar.frame_len(width, height);
        if out.len() != expected_out {
            return Err(SnapcutError::conversion(format!(
                "YUV buffer is {} bytes, expected {expected_out}",
                out.len()
            )));
        }

        let w = width as usize;
        let h = height as usize;
        let (y_plane, uv_plane) = out.split_at_mut(w * h);

        for (row, (src_row, y_row)) in rgba
            .chunks_exact(w * 4)
            .zip(y_plane.chunks_exact_mut(w))
            .enumerate()
        {
            for (px, y) in src_row.chunks_exact(4).zip(y_row.iter_mut()) {
                *y = luma(px[0], px[1], px[2]);
            }

            if row % 2 == 0 {
                let uv_row = &mut uv_plane[(row / 2) * w..(row / 2 + 1) * w];
                for (px, uv) in src_row.chunks_exact(8).zip(uv_row.chunks_exact_mut(2)) {
                    let (u, v) = chroma(px[0], px[1], px[2]);
                    uv[0] = u;
                    uv[1] = v;
                }
            }
        }
        Ok(())
    }
}
