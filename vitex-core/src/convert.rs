//! # Color Conversion
//!
//! CPU conversion from the semi-planar luma/chroma formats (NV12/NV21) into
//! packed 32-bit RGBA, the one format the texture cache uploads.
//!
//! Works like a fixed-function swscale replacement: lookup tables are built
//! once per colorspace, the hot loop is integer-only and allocation-free.
//! NV12 and NV21 share one loop parameterized on chroma byte order; the swap
//! is the whole difference between the two formats, so it is applied
//! explicitly rather than trusting the caller to pre-swizzle.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::{FrameDescriptor, PixelFormat};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("destination buffer too small: need {needed} bytes, have {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },
    #[error("no packed-RGBA conversion for {0:?}")]
    UnsupportedFormat(PixelFormat),
    #[error("frame is missing plane {0}")]
    MissingPlane(usize),
}

// ============================================================================
// Color Spaces
// ============================================================================

/// Which YUV -> RGB matrix to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    /// SD video (NTSC/PAL)
    Bt601,
    /// HD video
    Bt709,
}

impl ColorSpace {
    /// Luma coefficients (Wr, Wb); Wg = 1 - Wr - Wb.
    pub fn coefficients(&self) -> (f64, f64) {
        match self {
            Self::Bt601 => (0.299, 0.114),
            Self::Bt709 => (0.2126, 0.0722),
        }
    }

    /// Derived YUV -> RGB matrix.
    ///
    /// Y' = Wr*R + Wg*G + Wb*B, Cb = (B - Y')/(2*(1 - Wb)),
    /// Cr = (R - Y')/(2*(1 - Wr)), inverted.
    pub fn yuv_to_rgb_matrix(&self) -> [[f64; 3]; 3] {
        let (wr, wb) = self.coefficients();
        let wg = 1.0 - wr - wb;

        let cr_r = 2.0 * (1.0 - wr);
        let cb_g = -2.0 * wb * (1.0 - wb) / wg;
        let cr_g = -2.0 * wr * (1.0 - wr) / wg;
        let cb_b = 2.0 * (1.0 - wb);

        [
            [1.0, 0.0, cr_r],
            [1.0, cb_g, cr_g],
            [1.0, cb_b, 0.0],
        ]
    }
}

// ============================================================================
// Conversion Buffer
// ============================================================================

/// CPU staging buffer for packed RGBA output.
///
/// Grows on dimension change and is otherwise reused frame to frame, so the
/// steady state allocates nothing.
#[derive(Debug, Default)]
pub struct ConversionBuffer {
    data: Vec<u8>,
}

impl ConversionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure the buffer covers width x height x 4 bytes and return it.
    pub fn ensure(&mut self, width: u32, height: u32) -> &mut [u8] {
        let needed = width as usize * height as usize * 4;
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
        &mut self.data[..needed]
    }

    /// View the filled region. Requires a prior `ensure` covering at least
    /// these dimensions, so this stays crate-internal.
    pub(crate) fn as_slice(&self, width: u32, height: u32) -> &[u8] {
        &self.data[..width as usize * height as usize * 4]
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

// ============================================================================
// Converter
// ============================================================================

/// Fixed-point YUV -> RGBA converter with precomputed lookup tables.
pub struct Converter {
    color_space: ColorSpace,
    // 8.8 fixed point contributions, summed then rounded once
    y_table: [i32; 256],
    u_table_g: [i32; 256],
    u_table_b: [i32; 256],
    v_table_r: [i32; 256],
    v_table_g: [i32; 256],
}

impl Converter {
    pub fn new(color_space: ColorSpace) -> Self {
        let mut converter = Self {
            color_space,
            y_table: [0; 256],
            u_table_g: [0; 256],
            u_table_b: [0; 256],
            v_table_r: [0; 256],
            v_table_g: [0; 256],
        };
        converter.build_tables();
        converter
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    fn build_tables(&mut self) {
        let matrix = self.color_space.yuv_to_rgb_matrix();

        for i in 0..256 {
            let y = (i as i32) - 16; // studio swing: Y in 16..=235
            let uv = (i as f64) - 128.0; // U/V centered at 128

            // 298/256 expands 16..235 to full range
            self.y_table[i] = y * 298;

            self.u_table_g[i] = (uv * matrix[1][1] * 256.0).round() as i32;
            self.u_table_b[i] = (uv * matrix[2][1] * 256.0).round() as i32;
            self.v_table_r[i] = (uv * matrix[0][2] * 256.0).round() as i32;
            self.v_table_g[i] = (uv * matrix[1][2] * 256.0).round() as i32;
        }
    }

    /// Convert a semi-planar frame into packed RGBA.
    ///
    /// `dst` must hold at least width x height x 4 bytes; zero-sized frames
    /// are a no-op. The frame must already have passed classification, but
    /// plane presence is still checked so a direct caller gets an error
    /// instead of a panic.
    pub fn convert(&self, frame: &FrameDescriptor<'_>, dst: &mut [u8]) -> Result<(), ConvertError> {
        if frame.width == 0 || frame.height == 0 {
            return Ok(());
        }

        let needed = frame.width as usize * frame.height as usize * 4;
        if dst.len() < needed {
            return Err(ConvertError::BufferTooSmall {
                needed,
                capacity: dst.len(),
            });
        }

        let swap_chroma = match frame.format {
            PixelFormat::Nv12 => false,
            PixelFormat::Nv21 => true,
            other => return Err(ConvertError::UnsupportedFormat(other)),
        };

        let luma = frame.plane(0).ok_or(ConvertError::MissingPlane(0))?;
        let chroma = frame.plane(1).ok_or(ConvertError::MissingPlane(1))?;

        self.semi_planar_to_rgba(
            luma.data,
            luma.stride,
            chroma.data,
            chroma.stride,
            frame.width as usize,
            frame.height as usize,
            swap_chroma,
            &mut dst[..needed],
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn semi_planar_to_rgba(
        &self,
        y_plane: &[u8],
        y_stride: usize,
        uv_plane: &[u8],
        uv_stride: usize,
        width: usize,
        height: usize,
        swap_chroma: bool,
        dst: &mut [u8],
    ) {
        for row in 0..height {
            let y_row = row * y_stride;
            let uv_row = (row / 2) * uv_stride;
            let dst_row = row * width * 4;

            for col in 0..width {
                let y_val = y_plane[y_row + col] as usize;
                let uv_idx = uv_row + (col / 2) * 2;
                let (u_val, v_val) = if swap_chroma {
                    (uv_plane[uv_idx + 1] as usize, uv_plane[uv_idx] as usize)
                } else {
                    (uv_plane[uv_idx] as usize, uv_plane[uv_idx + 1] as usize)
                };

                let y_fixed = self.y_table[y_val];
                let r = fixed_to_byte(y_fixed + self.v_table_r[v_val]);
                let g = fixed_to_byte(y_fixed + self.u_table_g[u_val] + self.v_table_g[v_val]);
                let b = fixed_to_byte(y_fixed + self.u_table_b[u_val]);

                let dst_idx = dst_row + col * 4;
                dst[dst_idx] = r;
                dst[dst_idx + 1] = g;
                dst[dst_idx + 2] = b;
                dst[dst_idx + 3] = 255;
            }
        }
    }
}

/// Round an 8.8 fixed-point sum to a clamped byte.
#[inline]
fn fixed_to_byte(fixed: i32) -> u8 {
    ((fixed + 128) >> 8).clamp(0, 255) as u8
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Plane;

    fn solid_nv12(width: u32, height: u32, y: u8, u: u8, v: u8) -> (Vec<u8>, Vec<u8>) {
        let luma = vec![y; width as usize * height as usize];
        let chroma_rows = height.div_ceil(2) as usize;
        let mut chroma = vec![0u8; width as usize * chroma_rows];
        for pair in chroma.chunks_exact_mut(2) {
            pair[0] = u;
            pair[1] = v;
        }
        (luma, chroma)
    }

    fn convert_solid(
        format: PixelFormat,
        width: u32,
        height: u32,
        first: u8,
        second: u8,
        y: u8,
    ) -> Vec<u8> {
        let luma = vec![y; width as usize * height as usize];
        let chroma_rows = height.div_ceil(2) as usize;
        let mut chroma = vec![0u8; width as usize * chroma_rows];
        for pair in chroma.chunks_exact_mut(2) {
            pair[0] = first;
            pair[1] = second;
        }
        let frame = FrameDescriptor::semi_planar(
            format,
            width,
            height,
            Plane { data: &luma, stride: width as usize },
            Plane { data: &chroma, stride: width as usize },
        );
        let converter = Converter::new(ColorSpace::Bt709);
        let mut dst = vec![0u8; width as usize * height as usize * 4];
        converter.convert(&frame, &mut dst).unwrap();
        dst
    }

    fn assert_all_texels(dst: &[u8], expected: [u8; 4]) {
        for texel in dst.chunks_exact(4) {
            assert_eq!(texel, expected);
        }
    }

    #[test]
    fn test_black_is_exact() {
        let dst = convert_solid(PixelFormat::Nv12, 32, 16, 128, 128, 16);
        assert_all_texels(&dst, [0, 0, 0, 255]);
    }

    #[test]
    fn test_white_is_exact() {
        let dst = convert_solid(PixelFormat::Nv12, 32, 16, 128, 128, 235);
        assert_all_texels(&dst, [255, 255, 255, 255]);
    }

    #[test]
    fn test_mid_gray_is_exact() {
        // (128 - 16) * 298 = 33376; (33376 + 128) >> 8 = 130
        let dst = convert_solid(PixelFormat::Nv12, 32, 16, 128, 128, 128);
        assert_all_texels(&dst, [130, 130, 130, 255]);
    }

    #[test]
    fn test_saturated_chroma_is_exact() {
        // Y=81, U=90, V=240 through the BT.709 tables
        let dst = convert_solid(PixelFormat::Nv12, 32, 16, 90, 240, 81);
        assert_all_texels(&dst, [252, 30, 5, 255]);
    }

    #[test]
    fn test_nv21_swaps_chroma() {
        // Same logical color, chroma bytes in VU order: output must be
        // byte-identical to the NV12 rendition.
        let nv12 = convert_solid(PixelFormat::Nv12, 32, 16, 90, 240, 81);
        let nv21 = convert_solid(PixelFormat::Nv21, 32, 16, 240, 90, 81);
        assert_eq!(nv12, nv21);
    }

    #[test]
    fn test_zero_sized_input_is_noop() {
        let converter = Converter::new(ColorSpace::Bt709);
        let frame = FrameDescriptor::semi_planar(
            PixelFormat::Nv12,
            0,
            0,
            Plane { data: &[], stride: 0 },
            Plane { data: &[], stride: 0 },
        );
        let mut dst = [0u8; 0];
        assert!(converter.convert(&frame, &mut dst).is_ok());
    }

    #[test]
    fn test_undersized_destination_fails() {
        let (luma, chroma) = solid_nv12(16, 16, 128, 128, 128);
        let frame = FrameDescriptor::semi_planar(
            PixelFormat::Nv12,
            16,
            16,
            Plane { data: &luma, stride: 16 },
            Plane { data: &chroma, stride: 16 },
        );
        let converter = Converter::new(ColorSpace::Bt709);
        let mut dst = vec![0u8; 16 * 16 * 4 - 1];
        assert_eq!(
            converter.convert(&frame, &mut dst),
            Err(ConvertError::BufferTooSmall { needed: 16 * 16 * 4, capacity: 16 * 16 * 4 - 1 })
        );
    }

    #[test]
    fn test_padded_strides_are_respected() {
        // 4x2 frame with 16-byte strides; padding bytes are garbage that must
        // never be read as pixels.
        let width = 4u32;
        let height = 2u32;
        let stride = 16usize;
        let mut luma = vec![0xAAu8; stride * 2];
        let mut chroma = vec![0xAAu8; stride];
        for row in 0..2 {
            for col in 0..4 {
                luma[row * stride + col] = 128;
            }
        }
        for pair in 0..2 {
            chroma[pair * 2] = 128;
            chroma[pair * 2 + 1] = 128;
        }
        let frame = FrameDescriptor::semi_planar(
            PixelFormat::Nv12,
            width,
            height,
            Plane { data: &luma, stride },
            Plane { data: &chroma, stride },
        );
        let converter = Converter::new(ColorSpace::Bt709);
        let mut dst = vec![0u8; 4 * 2 * 4];
        converter.convert(&frame, &mut dst).unwrap();
        assert_all_texels(&dst, [130, 130, 130, 255]);
    }

    #[test]
    fn test_conversion_buffer_reuses_allocation() {
        let mut buffer = ConversionBuffer::new();
        buffer.ensure(64, 64);
        let capacity = buffer.capacity();
        buffer.ensure(32, 32);
        assert_eq!(buffer.capacity(), capacity);
        assert_eq!(buffer.as_slice(32, 32).len(), 32 * 32 * 4);
        buffer.ensure(128, 128);
        assert!(buffer.capacity() > capacity);
    }

    #[test]
    fn test_bt601_and_bt709_differ() {
        let bt601 = Converter::new(ColorSpace::Bt601);
        let bt709 = Converter::new(ColorSpace::Bt709);
        let (luma, chroma) = solid_nv12(16, 16, 81, 90, 240);
        let frame = FrameDescriptor::semi_planar(
            PixelFormat::Nv12,
            16,
            16,
            Plane { data: &luma, stride: 16 },
            Plane { data: &chroma, stride: 16 },
        );
        let mut a = vec![0u8; 16 * 16 * 4];
        let mut b = vec![0u8; 16 * 16 * 4];
        bt601.convert(&frame, &mut a).unwrap();
        bt709.convert(&frame, &mut b).unwrap();
        assert_ne!(a, b);
    }
}
