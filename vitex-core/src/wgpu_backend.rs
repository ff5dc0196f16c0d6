//! # wgpu Texture Backend
//!
//! Real GPU implementation of [`TextureBackend`] on top of a wgpu device and
//! queue. Cache-owned textures live in a handle map keyed by [`TextureId`];
//! externally produced textures (e.g. from a decoder sharing the device) are
//! registered under an opaque u64 handle and copied from on the GPU.
//!
//! Allocation failures are caught with wgpu error scopes instead of the
//! global uncaptured-error handler, so an out-of-memory create surfaces as a
//! `Result` on the call that caused it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::texture::{TextureBackend, TextureError, TextureId};

/// Texture backend backed by a wgpu device.
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    textures: HashMap<TextureId, wgpu::Texture>,
    imported: HashMap<u64, wgpu::Texture>,
    next_id: u64,
}

impl WgpuBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            textures: HashMap::new(),
            imported: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register an externally owned texture under an opaque handle so frames
    /// can reference it by id. The texture must be usable as a copy source.
    pub fn register_external(&mut self, handle: u64, texture: wgpu::Texture) {
        if self.imported.insert(handle, texture).is_some() {
            warn!(handle, "external texture handle re-registered");
        }
    }

    /// Forget an external texture. The caller keeps ownership semantics.
    pub fn unregister_external(&mut self, handle: u64) {
        self.imported.remove(&handle);
    }

    /// Look up a cache-owned texture for binding in the renderer.
    pub fn texture(&self, id: TextureId) -> Option<&wgpu::Texture> {
        self.textures.get(&id)
    }
}

impl TextureBackend for WgpuBackend {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, TextureError> {
        // Error scope turns a validation/OOM error on this one call into a
        // Result instead of a device-level callback.
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("vitex_frame_texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            warn!(width, height, %error, "texture allocation failed");
            return Err(TextureError::AllocationFailed {
                width,
                height,
                reason: "device out of memory",
            });
        }

        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.textures.insert(id, texture);
        debug!(?id, width, height, "created texture");
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if let Some(texture) = self.textures.remove(&id) {
            texture.destroy();
            debug!(?id, "destroyed texture");
        }
    }

    fn upload(
        &mut self,
        id: TextureId,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<(), TextureError> {
        let texture = self.textures.get(&id).ok_or(TextureError::NoStorage)?;

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn copy_external(
        &mut self,
        source: u64,
        dest: TextureId,
        width: u32,
        height: u32,
    ) -> Result<(), TextureError> {
        let src = self
            .imported
            .get(&source)
            .ok_or(TextureError::UnknownHandle(source))?;
        let dst = self.textures.get(&dest).ok_or(TextureError::NoStorage)?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("vitex_external_copy"),
            });
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: src,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: dst,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}
