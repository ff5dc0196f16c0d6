//! # Test Utilities
//!
//! In-memory texture backend that records every call so tests can assert on
//! allocation churn and upload counts.

use std::collections::HashMap;

use crate::texture::{TextureBackend, TextureError, TextureId};

/// Counting fake for [`TextureBackend`].
#[derive(Debug, Default)]
pub struct MockBackend {
    next_id: u64,
    live: HashMap<TextureId, (u32, u32)>,
    creates: u64,
    destroys: u64,
    uploads: u64,
    copies: u64,
    fail_next_create: bool,
    fail_all_creates: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Make the next create_texture call fail once.
    pub fn fail_next_create(&mut self) {
        self.fail_next_create = true;
    }

    /// Make every create_texture call fail until cleared.
    pub fn fail_all_creates(&mut self, fail: bool) {
        self.fail_all_creates = fail;
    }

    pub fn creates(&self) -> u64 {
        self.creates
    }

    pub fn destroys(&self) -> u64 {
        self.destroys
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn copies(&self) -> u64 {
        self.copies
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, id: TextureId) -> bool {
        self.live.contains_key(&id)
    }
}

impl TextureBackend for MockBackend {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, TextureError> {
        if self.fail_next_create || self.fail_all_creates {
            self.fail_next_create = false;
            return Err(TextureError::AllocationFailed {
                width,
                height,
                reason: "simulated out of memory",
            });
        }
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.live.insert(id, (width, height));
        self.creates += 1;
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if self.live.remove(&id).is_some() {
            self.destroys += 1;
        }
    }

    fn upload(
        &mut self,
        id: TextureId,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<(), TextureError> {
        let Some(&(w, h)) = self.live.get(&id) else {
            return Err(TextureError::NoStorage);
        };
        if (w, h) != (width, height) {
            return Err(TextureError::DimensionMismatch {
                width: w,
                height: h,
                got_width: width,
                got_height: height,
            });
        }
        assert_eq!(rgba.len(), width as usize * height as usize * 4);
        self.uploads += 1;
        Ok(())
    }

    fn copy_external(
        &mut self,
        _source: u64,
        dest: TextureId,
        _width: u32,
        _height: u32,
    ) -> Result<(), TextureError> {
        if !self.live.contains_key(&dest) {
            return Err(TextureError::NoStorage);
        }
        self.copies += 1;
        Ok(())
    }
}
