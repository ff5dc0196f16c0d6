//! # Frame Classification
//!
//! Decides, per frame, which of the pipeline's paths applies: the frame is
//! already a GPU texture, a packed RGB buffer that uploads as-is, a
//! semi-planar buffer that needs CPU conversion first, or something the
//! pipeline does not handle and must drop.

use crate::frame::{FrameDescriptor, PixelFormat};

/// Outcome of classifying one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Frame already carries a native texture handle; no CPU work needed.
    GpuResident { handle: u64 },
    /// Packed RGBA/BGRA; upload without conversion.
    CpuDirect,
    /// Semi-planar luma/chroma; run the converter first.
    CpuConvertible,
    /// Frame cannot be processed; drop it and keep the previous texture.
    Rejected(RejectReason),
}

/// Why a frame was rejected. Rejection is expected and recoverable; the
/// caller keeps showing the last good texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Pixel format outside the supported set (e.g. planar 4:2:0).
    Unsupported(PixelFormat),
    /// Required plane missing, undersized, or zero dimensions.
    Malformed(&'static str),
}

/// Classify one frame descriptor.
pub fn classify(frame: &FrameDescriptor<'_>) -> FrameClass {
    if let Some(handle) = frame.texture {
        if handle == 0 {
            return FrameClass::Rejected(RejectReason::Malformed("zero texture handle"));
        }
        if frame.width == 0 || frame.height == 0 {
            return FrameClass::Rejected(RejectReason::Malformed("zero dimensions"));
        }
        return FrameClass::GpuResident { handle };
    }

    if frame.width == 0 || frame.height == 0 {
        return FrameClass::Rejected(RejectReason::Malformed("zero dimensions"));
    }

    if !frame.format.is_packed_rgb() && !frame.format.is_semi_planar() {
        return FrameClass::Rejected(RejectReason::Unsupported(frame.format));
    }

    // Every required plane must exist and cover stride * rows bytes.
    for index in 0..frame.format.plane_count() {
        let Some(plane) = frame.plane(index) else {
            return FrameClass::Rejected(RejectReason::Malformed("missing plane"));
        };
        if plane.stride < frame.format.min_stride(index, frame.width) {
            return FrameClass::Rejected(RejectReason::Malformed("stride below row width"));
        }
        let rows = frame.format.plane_rows(index, frame.height);
        // The final row only needs the visible bytes, not the full stride.
        let needed = plane.stride * (rows - 1) + frame.format.min_stride(index, frame.width);
        if plane.data.len() < needed {
            return FrameClass::Rejected(RejectReason::Malformed("plane shorter than stride x rows"));
        }
    }

    if frame.format.is_packed_rgb() {
        FrameClass::CpuDirect
    } else {
        FrameClass::CpuConvertible
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Plane;

    fn nv12_frame(width: u32, height: u32, y: &[u8], uv: &[u8]) -> FrameClass {
        let frame = FrameDescriptor::semi_planar(
            PixelFormat::Nv12,
            width,
            height,
            Plane { data: y, stride: width as usize },
            Plane { data: uv, stride: width as usize },
        );
        classify(&frame)
    }

    #[test]
    fn test_gpu_handle_wins() {
        let frame = FrameDescriptor::gpu_texture(7, 640, 480);
        assert_eq!(classify(&frame), FrameClass::GpuResident { handle: 7 });
    }

    #[test]
    fn test_zero_handle_is_malformed() {
        let frame = FrameDescriptor::gpu_texture(0, 640, 480);
        assert!(matches!(
            classify(&frame),
            FrameClass::Rejected(RejectReason::Malformed(_))
        ));
    }

    #[test]
    fn test_packed_rgb_is_direct() {
        let data = vec![0u8; 640 * 480 * 4];
        for format in [PixelFormat::Rgba32, PixelFormat::Bgra32] {
            let frame = FrameDescriptor::packed(format, 640, 480, &data, 640 * 4);
            assert_eq!(classify(&frame), FrameClass::CpuDirect);
        }
    }

    #[test]
    fn test_semi_planar_is_convertible() {
        let y = vec![0u8; 640 * 480];
        let uv = vec![0u8; 640 * 240];
        assert_eq!(nv12_frame(640, 480, &y, &uv), FrameClass::CpuConvertible);
    }

    #[test]
    fn test_planar_yuv_is_unsupported() {
        let y = vec![0u8; 640 * 480];
        let u = vec![0u8; 320 * 240];
        let v = vec![0u8; 320 * 240];
        let frame = FrameDescriptor {
            width: 640,
            height: 480,
            format: PixelFormat::I420,
            planes: [
                Some(Plane { data: &y, stride: 640 }),
                Some(Plane { data: &u, stride: 320 }),
                Some(Plane { data: &v, stride: 320 }),
            ],
            texture: None,
        };
        assert_eq!(
            classify(&frame),
            FrameClass::Rejected(RejectReason::Unsupported(PixelFormat::I420))
        );
    }

    #[test]
    fn test_short_plane_is_malformed() {
        let y = vec![0u8; 640 * 480];
        let uv = vec![0u8; 640 * 240 - 1];
        assert!(matches!(
            nv12_frame(640, 480, &y, &uv),
            FrameClass::Rejected(RejectReason::Malformed(_))
        ));
    }

    #[test]
    fn test_zero_dimensions_are_malformed() {
        let data = vec![0u8; 16];
        let frame = FrameDescriptor::packed(PixelFormat::Rgba32, 0, 0, &data, 16);
        assert!(matches!(
            classify(&frame),
            FrameClass::Rejected(RejectReason::Malformed(_))
        ));
    }

    #[test]
    fn test_missing_chroma_plane_is_malformed() {
        let y = vec![0u8; 640 * 480];
        let frame = FrameDescriptor {
            width: 640,
            height: 480,
            format: PixelFormat::Nv12,
            planes: [Some(Plane { data: &y, stride: 640 }), None, None],
            texture: None,
        };
        assert!(matches!(
            classify(&frame),
            FrameClass::Rejected(RejectReason::Malformed(_))
        ));
    }
}
