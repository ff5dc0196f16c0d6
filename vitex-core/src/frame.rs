//! # Frame Data Model
//!
//! Describes one video frame of arbitrary provenance: a CPU pixel buffer in
//! one of several packings, or an already GPU-resident texture identified by
//! an opaque native handle.
//!
//! `FrameDescriptor` borrows the producer's plane memory and is only valid
//! for the duration of one call. `OwnedFrame` is the deep-copied snapshot the
//! mailbox hands to the render thread once the producer has returned.

use serde::{Deserialize, Serialize};

// ============================================================================
// Pixel Formats
// ============================================================================

/// Source pixel packing of a CPU-resident frame.
///
/// The pipeline uploads packed RGB formats directly and converts the
/// semi-planar 4:2:0 formats on the CPU first. The planar 4:2:0 formats are
/// recognized so the classifier can reject them by name instead of guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit RGBA
    Rgba32,
    /// Packed 8-bit BGRA (Windows capture / decoder output)
    Bgra32,
    /// Semi-planar 4:2:0, full-res Y plane + interleaved UV plane
    Nv12,
    /// Semi-planar 4:2:0 with swapped chroma order (VU)
    Nv21,
    /// Planar 4:2:0 (Y, U, V planes) - not supported by the converter
    I420,
    /// Planar 4:2:0 with swapped chroma planes - not supported
    Yv12,
}

impl PixelFormat {
    /// Number of planes a CPU frame of this format carries.
    pub fn plane_count(&self) -> usize {
        match self {
            Self::Rgba32 | Self::Bgra32 => 1,
            Self::Nv12 | Self::Nv21 => 2,
            Self::I420 | Self::Yv12 => 3,
        }
    }

    /// True for the packed 32-bit-per-pixel RGB formats.
    pub fn is_packed_rgb(&self) -> bool {
        matches!(self, Self::Rgba32 | Self::Bgra32)
    }

    /// True for the semi-planar luma/chroma formats the converter handles.
    pub fn is_semi_planar(&self) -> bool {
        matches!(self, Self::Nv12 | Self::Nv21)
    }

    /// Minimum row stride in bytes for the given plane at the given width.
    pub fn min_stride(&self, plane: usize, width: u32) -> usize {
        let w = width as usize;
        match self {
            Self::Rgba32 | Self::Bgra32 => w * 4,
            Self::Nv12 | Self::Nv21 => match plane {
                0 => w,
                // Interleaved chroma: half-width pairs of bytes
                _ => w.div_ceil(2) * 2,
            },
            Self::I420 | Self::Yv12 => match plane {
                0 => w,
                _ => w.div_ceil(2),
            },
        }
    }

    /// Number of rows the given plane holds at the given height.
    pub fn plane_rows(&self, plane: usize, height: u32) -> usize {
        let h = height as usize;
        if plane == 0 {
            h
        } else {
            h.div_ceil(2)
        }
    }
}

// ============================================================================
// Frame Descriptor (borrowed)
// ============================================================================

/// One plane of borrowed pixel data.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    /// Row stride in bytes; may exceed the minimum for padded sources.
    pub stride: usize,
}

/// Borrowed description of one incoming frame.
///
/// Owned by the producer for the duration of one call; nothing in the
/// pipeline may retain a reference into it afterwards.
#[derive(Debug, Clone, Copy)]
pub struct FrameDescriptor<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: [Option<Plane<'a>>; 3],
    /// Opaque native texture identifier for GPU-resident frames.
    /// Zero is never a valid handle.
    pub texture: Option<u64>,
}

impl<'a> FrameDescriptor<'a> {
    /// A packed RGBA/BGRA frame from a single plane.
    pub fn packed(format: PixelFormat, width: u32, height: u32, data: &'a [u8], stride: usize) -> Self {
        Self {
            width,
            height,
            format,
            planes: [Some(Plane { data, stride }), None, None],
            texture: None,
        }
    }

    /// A semi-planar luma/chroma frame from two planes.
    pub fn semi_planar(
        format: PixelFormat,
        width: u32,
        height: u32,
        luma: Plane<'a>,
        chroma: Plane<'a>,
    ) -> Self {
        Self {
            width,
            height,
            format,
            planes: [Some(luma), Some(chroma), None],
            texture: None,
        }
    }

    /// A frame that already lives on the GPU.
    pub fn gpu_texture(handle: u64, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            // The packing of an external texture is the renderer's business;
            // tag it with the canonical packed format.
            format: PixelFormat::Rgba32,
            planes: [None, None, None],
            texture: Some(handle),
        }
    }

    pub fn plane(&self, index: usize) -> Option<Plane<'a>> {
        self.planes.get(index).copied().flatten()
    }
}

// ============================================================================
// Owned Frame (mailbox snapshot)
// ============================================================================

#[derive(Debug, Clone)]
struct OwnedPlane {
    data: Vec<u8>,
    stride: usize,
}

/// Deep-copied frame snapshot held by the mailbox.
///
/// The producer's buffers are gone by the time the render thread looks at
/// this, so CPU plane data is copied wholesale. GPU-resident frames copy only
/// the handle.
#[derive(Debug, Clone)]
pub struct OwnedFrame {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<OwnedPlane>,
    texture: Option<u64>,
}

impl OwnedFrame {
    /// Snapshot a borrowed descriptor.
    pub fn copy_from(frame: &FrameDescriptor<'_>) -> Self {
        let planes = frame
            .planes
            .iter()
            .flatten()
            .map(|p| OwnedPlane {
                data: p.data.to_vec(),
                stride: p.stride,
            })
            .collect();

        Self {
            width: frame.width,
            height: frame.height,
            format: frame.format,
            planes,
            texture: frame.texture,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Approximate CPU memory held by this snapshot.
    pub fn byte_size(&self) -> usize {
        self.planes.iter().map(|p| p.data.len()).sum()
    }

    /// Borrow the snapshot back as a descriptor for classification and
    /// conversion.
    pub fn as_descriptor(&self) -> FrameDescriptor<'_> {
        let mut planes = [None, None, None];
        for (slot, plane) in planes.iter_mut().zip(&self.planes) {
            *slot = Some(Plane {
                data: &plane.data,
                stride: plane.stride,
            });
        }
        FrameDescriptor {
            width: self.width,
            height: self.height,
            format: self.format,
            planes,
            texture: self.texture,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
