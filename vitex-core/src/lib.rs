//! # VITEX Core
//!
//! Video frame to GPU texture unification pipeline.
//!
//! Frames arrive from decoders, capture callbacks and GPU producers in
//! different shapes; everything leaves as one bindable RGBA texture.

// ============================================================================
// Frame Model
// ============================================================================
pub mod classify;
pub mod frame;

// ============================================================================
// CPU Processing
// ============================================================================
pub mod convert;

// ============================================================================
// GPU Resources
// ============================================================================
pub mod texture;
pub mod wgpu_backend;

// ============================================================================
// Pipeline / Threading
// ============================================================================
pub mod handoff;
pub mod pipeline;

#[cfg(test)]
mod testutil;

pub use classify::{classify, FrameClass, RejectReason};
pub use convert::{ColorSpace, ConversionBuffer, ConvertError, Converter};
pub use frame::{FrameDescriptor, OwnedFrame, PixelFormat, Plane};
pub use handoff::{FrameHandoff, HandoffStats};
pub use pipeline::{
    FramePipeline, PipelineError, PipelineState, PipelineStats, RenderSession, TextureResult,
};
pub use texture::{RenderContext, TextureBackend, TextureCache, TextureError, TextureId};
pub use wgpu_backend::WgpuBackend;

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
