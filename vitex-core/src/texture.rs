//! # Texture Cache - GPU Texture Lifecycle
//!
//! Owns the two GPU textures the pipeline works with: a staging texture for
//! CPU uploads and the output texture handed to the renderer. Textures are
//! created lazily, reused while dimensions hold, and destroyed before a
//! replacement is created when dimensions change. There is no in-place
//! resize.
//!
//! All methods take a [`RenderContext`] so texture work can only happen on
//! the thread that owns the GPU device.

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextureError {
    #[error("texture allocation failed ({width}x{height}): {reason}")]
    AllocationFailed {
        width: u32,
        height: u32,
        reason: &'static str,
    },
    #[error("no texture allocated for this slot")]
    NoStorage,
    #[error("upload dimensions {got_width}x{got_height} do not match texture {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
    #[error("unknown external texture handle {0}")]
    UnknownHandle(u64),
}

/// Identifier for a backend-owned texture. Never reused within one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

// ============================================================================
// Render Thread Token
// ============================================================================

/// Proof of being on the render thread.
///
/// Constructed once on the thread that owns the GPU device; `!Send` and
/// `!Sync`, so every API that takes `&RenderContext` is statically confined
/// to that thread. `assert_current` catches a token smuggled across threads
/// through unsafe code.
#[derive(Debug)]
pub struct RenderContext {
    thread: std::thread::ThreadId,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl RenderContext {
    /// Bind a context to the calling thread.
    pub fn bind() -> Self {
        Self {
            thread: std::thread::current().id(),
            _not_send: std::marker::PhantomData,
        }
    }

    /// Panics if called off the owning thread.
    pub fn assert_current(&self) {
        assert_eq!(
            self.thread,
            std::thread::current().id(),
            "render context used off its owning thread"
        );
    }
}

// ============================================================================
// Backend Trait
// ============================================================================

/// The GPU operations the cache needs, kept narrow so tests can count calls.
pub trait TextureBackend {
    /// Allocate an RGBA texture. Dimensions are nonzero.
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, TextureError>;

    /// Release a texture. Unknown ids are ignored.
    fn destroy_texture(&mut self, id: TextureId);

    /// Upload a full image of packed RGBA rows (tightly packed, width * 4).
    fn upload(
        &mut self,
        id: TextureId,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<(), TextureError>;

    /// Copy an externally registered texture into a cache-owned one.
    fn copy_external(
        &mut self,
        source: u64,
        dest: TextureId,
        width: u32,
        height: u32,
    ) -> Result<(), TextureError>;
}

// ============================================================================
// Texture Cache
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct TextureSlot {
    id: Option<TextureId>,
    width: u32,
    height: u32,
}

impl TextureSlot {
    fn matches(&self, width: u32, height: u32) -> bool {
        self.id.is_some() && self.width == width && self.height == height
    }
}

/// Caches the staging and output textures across frames.
pub struct TextureCache<B: TextureBackend> {
    backend: B,
    staging: TextureSlot,
    output: TextureSlot,
    created: u64,
    destroyed: u64,
}

impl<B: TextureBackend> TextureCache<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            staging: TextureSlot::default(),
            output: TextureSlot::default(),
            created: 0,
            destroyed: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Textures created and destroyed since construction.
    pub fn churn(&self) -> (u64, u64) {
        (self.created, self.destroyed)
    }

    fn acquire(
        slot: &mut TextureSlot,
        backend: &mut B,
        created: &mut u64,
        destroyed: &mut u64,
        width: u32,
        height: u32,
    ) -> Result<TextureId, TextureError> {
        if slot.matches(width, height) {
            return Ok(slot.id.unwrap());
        }

        // Destroy before create so a failed allocation never leaves two
        // textures alive for one slot.
        if let Some(id) = slot.id.take() {
            debug!(?id, old_w = slot.width, old_h = slot.height, new_w = width, new_h = height,
                "texture dimensions changed, recreating");
            backend.destroy_texture(id);
            *destroyed += 1;
        }

        let id = backend.create_texture(width, height)?;
        *created += 1;
        *slot = TextureSlot {
            id: Some(id),
            width,
            height,
        };
        Ok(id)
    }

    /// Get the staging texture for the given dimensions, recreating it only
    /// on dimension change.
    pub fn acquire_staging(
        &mut self,
        ctx: &RenderContext,
        width: u32,
        height: u32,
    ) -> Result<TextureId, TextureError> {
        ctx.assert_current();
        Self::acquire(
            &mut self.staging,
            &mut self.backend,
            &mut self.created,
            &mut self.destroyed,
            width,
            height,
        )
    }

    /// Get the output texture for the given dimensions.
    pub fn acquire_output(
        &mut self,
        ctx: &RenderContext,
        width: u32,
        height: u32,
    ) -> Result<TextureId, TextureError> {
        ctx.assert_current();
        Self::acquire(
            &mut self.output,
            &mut self.backend,
            &mut self.created,
            &mut self.destroyed,
            width,
            height,
        )
    }

    /// Upload packed RGBA into an already-acquired texture. Dimensions must
    /// match the allocation exactly.
    pub fn upload(
        &mut self,
        ctx: &RenderContext,
        id: TextureId,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<(), TextureError> {
        ctx.assert_current();
        let slot = if self.staging.id == Some(id) {
            &self.staging
        } else if self.output.id == Some(id) {
            &self.output
        } else {
            return Err(TextureError::NoStorage);
        };
        if slot.width != width || slot.height != height {
            return Err(TextureError::DimensionMismatch {
                width: slot.width,
                height: slot.height,
                got_width: width,
                got_height: height,
            });
        }
        self.backend.upload(id, width, height, rgba)
    }

    /// Copy an external GPU texture into the output slot and return it.
    pub fn copy_external(
        &mut self,
        ctx: &RenderContext,
        source: u64,
        width: u32,
        height: u32,
    ) -> Result<TextureId, TextureError> {
        let dest = self.acquire_output(ctx, width, height)?;
        self.backend.copy_external(source, dest, width, height)?;
        Ok(dest)
    }

    /// Destroy both textures. Safe to call repeatedly and with nothing
    /// allocated.
    pub fn release_all(&mut self, ctx: &RenderContext) {
        ctx.assert_current();
        for slot in [&mut self.staging, &mut self.output] {
            if let Some(id) = slot.id.take() {
                self.backend.destroy_texture(id);
                self.destroyed += 1;
            }
            *slot = TextureSlot::default();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockBackend;

    fn cache() -> (TextureCache<MockBackend>, RenderContext) {
        (TextureCache::new(MockBackend::new()), RenderContext::bind())
    }

    #[test]
    fn test_same_dimensions_reuse_the_texture() {
        let (mut cache, ctx) = cache();
        let a = cache.acquire_staging(&ctx, 640, 480).unwrap();
        let b = cache.acquire_staging(&ctx, 640, 480).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.backend().creates(), 1);
    }

    #[test]
    fn test_dimension_change_destroys_then_creates() {
        let (mut cache, ctx) = cache();
        let a = cache.acquire_staging(&ctx, 640, 480).unwrap();
        let b = cache.acquire_staging(&ctx, 800, 600).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.backend().creates(), 2);
        assert_eq!(cache.backend().destroys(), 1);
        assert!(!cache.backend().is_live(a));
        assert!(cache.backend().is_live(b));
    }

    #[test]
    fn test_staging_and_output_are_independent() {
        let (mut cache, ctx) = cache();
        let staging = cache.acquire_staging(&ctx, 640, 480).unwrap();
        let output = cache.acquire_output(&ctx, 640, 480).unwrap();
        assert_ne!(staging, output);
        // Resizing one slot leaves the other alone
        cache.acquire_output(&ctx, 800, 600).unwrap();
        assert!(cache.backend().is_live(staging));
    }

    #[test]
    fn test_upload_requires_matching_dimensions() {
        let (mut cache, ctx) = cache();
        let id = cache.acquire_staging(&ctx, 4, 4).unwrap();
        let pixels = vec![0u8; 4 * 4 * 4];
        assert!(cache.upload(&ctx, id, 4, 4, &pixels).is_ok());
        assert_eq!(
            cache.upload(&ctx, id, 8, 8, &pixels),
            Err(TextureError::DimensionMismatch {
                width: 4,
                height: 4,
                got_width: 8,
                got_height: 8,
            })
        );
    }

    #[test]
    fn test_upload_to_unknown_texture_fails() {
        let (mut cache, ctx) = cache();
        let pixels = vec![0u8; 16];
        assert_eq!(
            cache.upload(&ctx, TextureId(99), 2, 2, &pixels),
            Err(TextureError::NoStorage)
        );
    }

    #[test]
    fn test_release_all_is_idempotent() {
        let (mut cache, ctx) = cache();
        cache.acquire_staging(&ctx, 640, 480).unwrap();
        cache.acquire_output(&ctx, 640, 480).unwrap();
        cache.release_all(&ctx);
        assert_eq!(cache.backend().live_count(), 0);
        assert_eq!(cache.backend().destroys(), 2);
        cache.release_all(&ctx);
        cache.release_all(&ctx);
        assert_eq!(cache.backend().destroys(), 2);
    }

    #[test]
    fn test_failed_allocation_leaves_slot_empty() {
        let (mut cache, ctx) = cache();
        cache.acquire_staging(&ctx, 640, 480).unwrap();
        cache.backend_mut().fail_next_create();
        assert!(cache.acquire_staging(&ctx, 800, 600).is_err());
        // The old texture was destroyed before the failed create; nothing
        // should be live for the slot.
        assert_eq!(cache.backend().live_count(), 0);
        // Recovery: the next acquire allocates fresh
        assert!(cache.acquire_staging(&ctx, 800, 600).is_ok());
    }

    #[test]
    fn test_copy_external_lands_in_output() {
        let (mut cache, ctx) = cache();
        let dest = cache.copy_external(&ctx, 7, 640, 480).unwrap();
        assert!(cache.backend().is_live(dest));
        assert_eq!(cache.backend().copies(), 1);
    }
}
