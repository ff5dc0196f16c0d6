//! # Frame Pipeline - Unification of Frame Sources into One Texture
//!
//! Drives a frame from whatever shape it arrived in to a single GPU texture
//! the renderer can bind:
//!
//! ```text
//! ┌────────────┐   classify   ┌───────────────┐
//! │ OwnedFrame │─────────────►│ GPU_RESIDENT  │──copy──────┐
//! └────────────┘              │ CPU_DIRECT    │──upload──┐ │
//!                             │ CPU_CONVERT   │─convert─►│ │
//!                             │ REJECTED      │──drop    │ │
//!                             └───────────────┘          ▼ ▼
//!                                                ┌───────────────┐
//!                                                │ TextureResult │
//!                                                └───────────────┘
//! ```
//!
//! The pipeline is single-threaded by construction: every GPU-touching
//! method takes a [`RenderContext`]. Rejected frames are dropped and the
//! previous texture keeps showing. An allocation failure latches the
//! pipeline into a failed state that only [`FramePipeline::reset`] clears,
//! since retrying allocation every frame on an exhausted device just churns.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classify::{classify, FrameClass, RejectReason};
use crate::convert::{ColorSpace, ConversionBuffer, Converter};
use crate::frame::{OwnedFrame, PixelFormat};
use crate::handoff::FrameHandoff;
use crate::texture::{RenderContext, TextureBackend, TextureCache, TextureError, TextureId};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
    #[error("gpu resources exhausted, reset required")]
    ResourceExhausted,
    #[error("no frame processed yet")]
    NotReady,
    #[error("pipeline has been shut down")]
    ShutDown,
}

/// Lifecycle of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    /// No frame seen yet; no GPU resources held.
    Uninitialized,
    /// Textures may be allocated; waiting for the next frame.
    Ready,
    /// Inside `process`.
    Processing,
    /// Terminal. All GPU resources released.
    ShutDown,
}

/// The texture produced for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureResult {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
}

/// Cumulative pipeline counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub direct_uploads: u64,
    pub conversions: u64,
    pub gpu_copies: u64,
    pub rejected: u64,
    pub allocation_failures: u64,
    pub resets: u64,
}

// ============================================================================
// Frame Pipeline
// ============================================================================

pub struct FramePipeline<B: TextureBackend> {
    cache: TextureCache<B>,
    converter: Converter,
    scratch: ConversionBuffer,
    state: PipelineState,
    last_result: Option<TextureResult>,
    fatal: bool,
    stats: PipelineStats,
    warned_rejection: bool,
}

impl<B: TextureBackend> FramePipeline<B> {
    pub fn new(backend: B, color_space: ColorSpace) -> Self {
        Self {
            cache: TextureCache::new(backend),
            converter: Converter::new(color_space),
            scratch: ConversionBuffer::new(),
            state: PipelineState::Uninitialized,
            last_result: None,
            fatal: false,
            stats: PipelineStats::default(),
            warned_rejection: false,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn last_result(&self) -> Option<TextureResult> {
        self.last_result
    }

    /// True while the allocation-failure latch is set.
    pub fn is_exhausted(&self) -> bool {
        self.fatal
    }

    pub fn backend(&self) -> &B {
        self.cache.backend()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.cache.backend_mut()
    }

    /// Run one frame through classification, conversion and upload.
    ///
    /// Returns the texture to display for this frame. For a rejected frame
    /// that is the previous frame's texture; the error is returned only when
    /// there is no previous texture to fall back to.
    pub fn process(
        &mut self,
        ctx: &RenderContext,
        frame: &OwnedFrame,
    ) -> Result<TextureResult, PipelineError> {
        match self.state {
            PipelineState::ShutDown => return Err(PipelineError::ShutDown),
            _ if self.fatal => return Err(PipelineError::ResourceExhausted),
            PipelineState::Uninitialized => {
                if frame.width() == 0 || frame.height() == 0 {
                    return Err(PipelineError::NotReady);
                }
                info!(
                    width = frame.width(),
                    height = frame.height(),
                    format = ?frame.format(),
                    "first frame, pipeline ready"
                );
            }
            _ => {}
        }

        self.state = PipelineState::Processing;
        let result = self.process_inner(ctx, frame);
        self.state = PipelineState::Ready;

        match result {
            Ok(texture) => {
                self.last_result = Some(texture);
                Ok(texture)
            }
            Err(error) => {
                if error == PipelineError::ResourceExhausted {
                    self.fatal = true;
                    // A failed reallocation has already destroyed the old
                    // texture; the previous result no longer has storage.
                    self.last_result = None;
                    self.stats.allocation_failures += 1;
                    warn!("texture allocation failed, pipeline latched until reset");
                }
                Err(error)
            }
        }
    }

    fn process_inner(
        &mut self,
        ctx: &RenderContext,
        frame: &OwnedFrame,
    ) -> Result<TextureResult, PipelineError> {
        let desc = frame.as_descriptor();
        let (width, height) = (frame.width(), frame.height());

        match classify(&desc) {
            FrameClass::Rejected(reason) => self.reject(reason),
            FrameClass::GpuResident { handle } => {
                let id = match self.cache.copy_external(ctx, handle, width, height) {
                    Ok(id) => id,
                    // A stale or never-registered handle is a bad frame, not
                    // a dead pipeline.
                    Err(TextureError::UnknownHandle(_)) => {
                        return self.reject(RejectReason::Malformed("unknown texture handle"));
                    }
                    Err(error) => return Err(map_texture_error(error)),
                };
                self.stats.frames_processed += 1;
                self.stats.gpu_copies += 1;
                Ok(TextureResult { id, width, height })
            }
            FrameClass::CpuDirect => {
                let plane = desc.plane(0).ok_or(PipelineError::MalformedFrame("missing plane"))?;
                let tight = width as usize * 4;
                let id = self
                    .cache
                    .acquire_staging(ctx, width, height)
                    .map_err(map_texture_error)?;
                if plane.stride == tight {
                    self.cache
                        .upload(ctx, id, width, height, &plane.data[..tight * height as usize])
                        .map_err(map_texture_error)?;
                } else {
                    // Padded rows: compact into the scratch buffer first.
                    let dst = self.scratch.ensure(width, height);
                    for row in 0..height as usize {
                        let src = &plane.data[row * plane.stride..row * plane.stride + tight];
                        dst[row * tight..(row + 1) * tight].copy_from_slice(src);
                    }
                    self.cache
                        .upload(ctx, id, width, height, self.scratch.as_slice(width, height))
                        .map_err(map_texture_error)?;
                }
                self.stats.frames_processed += 1;
                self.stats.direct_uploads += 1;
                Ok(TextureResult { id, width, height })
            }
            FrameClass::CpuConvertible => {
                let dst = self.scratch.ensure(width, height);
                if let Err(error) = self.converter.convert(&desc, dst) {
                    debug!(%error, "conversion failed, dropping frame");
                    return self.reject(RejectReason::Malformed("conversion failed"));
                }
                let id = self
                    .cache
                    .acquire_staging(ctx, width, height)
                    .map_err(map_texture_error)?;
                self.cache
                    .upload(ctx, id, width, height, self.scratch.as_slice(width, height))
                    .map_err(map_texture_error)?;
                self.stats.frames_processed += 1;
                self.stats.conversions += 1;
                Ok(TextureResult { id, width, height })
            }
        }
    }

    /// Drop the frame. Falls back to the previous texture when one exists.
    fn reject(&mut self, reason: RejectReason) -> Result<TextureResult, PipelineError> {
        self.stats.rejected += 1;
        if !self.warned_rejection {
            warn!(?reason, "dropping frame (further drops logged at debug)");
            self.warned_rejection = true;
        } else {
            debug!(?reason, "dropping frame");
        }
        self.last_result.ok_or(match reason {
            RejectReason::Unsupported(format) => PipelineError::UnsupportedFormat(format),
            RejectReason::Malformed(message) => PipelineError::MalformedFrame(message),
        })
    }

    /// Drop GPU textures without tearing down the pipeline. The next frame
    /// reallocates at its own dimensions.
    pub fn release_textures(&mut self, ctx: &RenderContext) {
        self.cache.release_all(ctx);
        self.last_result = None;
    }

    /// Clear the failure latch and all state; back to `Uninitialized`.
    pub fn reset(&mut self, ctx: &RenderContext) {
        self.cache.release_all(ctx);
        self.last_result = None;
        self.fatal = false;
        self.warned_rejection = false;
        self.state = PipelineState::Uninitialized;
        self.stats.resets += 1;
        info!("pipeline reset");
    }

    /// Release everything and refuse all further work. Idempotent.
    pub fn shutdown(&mut self, ctx: &RenderContext) {
        if self.state == PipelineState::ShutDown {
            return;
        }
        self.cache.release_all(ctx);
        self.last_result = None;
        self.state = PipelineState::ShutDown;
        info!(stats = ?self.stats, "pipeline shut down");
    }

    /// Texture creations and destructions since construction.
    pub fn texture_churn(&self) -> (u64, u64) {
        self.cache.churn()
    }
}

fn map_texture_error(error: TextureError) -> PipelineError {
    match error {
        TextureError::AllocationFailed { .. } => PipelineError::ResourceExhausted,
        TextureError::UnknownHandle(_) => PipelineError::MalformedFrame("unknown texture handle"),
        TextureError::NoStorage | TextureError::DimensionMismatch { .. } => {
            PipelineError::MalformedFrame("texture storage mismatch")
        }
    }
}

// ============================================================================
// Render Session
// ============================================================================

/// Ties a [`FrameHandoff`] to a [`FramePipeline`] on the render thread.
///
/// The producer side holds the `Arc<FrameHandoff>` from [`RenderSession::handoff`];
/// the render thread calls [`RenderSession::render_tick`] once per drawn
/// frame and binds whatever texture comes back.
pub struct RenderSession<B: TextureBackend> {
    handoff: std::sync::Arc<FrameHandoff>,
    pipeline: FramePipeline<B>,
    ctx: RenderContext,
}

impl<B: TextureBackend> RenderSession<B> {
    pub fn new(backend: B, color_space: ColorSpace) -> Self {
        Self {
            handoff: std::sync::Arc::new(FrameHandoff::new()),
            pipeline: FramePipeline::new(backend, color_space),
            ctx: RenderContext::bind(),
        }
    }

    /// Producer-side handle for publishing frames.
    pub fn handoff(&self) -> std::sync::Arc<FrameHandoff> {
        std::sync::Arc::clone(&self.handoff)
    }

    /// Process the newest pending frame, or fall back to the last texture.
    pub fn render_tick(&mut self) -> Result<TextureResult, PipelineError> {
        match self.handoff.consume_latest() {
            Some(frame) => self.pipeline.process(&self.ctx, &frame),
            None => {
                // The latch must hold on empty ticks too; the last texture
                // was dropped when the allocation failed.
                if self.pipeline.is_exhausted() {
                    return Err(PipelineError::ResourceExhausted);
                }
                self.pipeline.last_result().ok_or(PipelineError::NotReady)
            }
        }
    }

    /// Surface resized: drop frame textures so the next frame recreates them.
    pub fn on_resize(&mut self) {
        self.pipeline.release_textures(&self.ctx);
    }

    pub fn reset(&mut self) {
        self.handoff.clear();
        self.pipeline.reset(&self.ctx);
    }

    pub fn shutdown(&mut self) {
        self.handoff.clear();
        self.pipeline.shutdown(&self.ctx);
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    pub fn pipeline(&self) -> &FramePipeline<B> {
        &self.pipeline
    }

    pub fn backend(&self) -> &B {
        self.pipeline.backend()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.pipeline.backend_mut()
    }
}

// ============================================================================
// Tests
// ============================================================================
