//! The allocation boundary between the frame graph and a graphics backend.
//!
//! The frame graph never creates GPU objects itself. During the execute
//! phase it asks a [`ResourceAllocator`] for the physical textures and
//! render targets backing its virtual resources, and returns them as soon
//! as the last pass using them has run. A concrete backend implements the
//! trait on top of its own device objects; [`PoolAllocator`] is the
//! in-crate implementation used by tests and benchmarks, pooling returned
//! objects for reuse across frames.

use std::collections::HashMap;

use crate::types::{AttachmentMask, TextureDescriptor, MAX_COLOR_ATTACHMENTS};

/// Handle to a physical texture owned by the allocator.
///
/// Opaque to the frame graph; the backend decides what the id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(u64);

impl TextureHandle {
    /// Create a handle from a backend-chosen id.
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// The backend-chosen id.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Handle to a physical render target owned by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetHandle(u64);

impl RenderTargetHandle {
    /// Create a handle from a backend-chosen id.
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// The backend-chosen id.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Physical backing of one bound attachment, as handed to the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentInfo {
    /// The backing texture.
    pub texture: TextureHandle,
    /// Mip level rendered to.
    pub mip_level: u32,
    /// Array layer rendered to.
    pub layer: u32,
}

/// Creates and destroys the physical GPU objects backing virtual resources.
///
/// Called many times per frame with matching create/destroy pairs; a
/// pooling or aliasing strategy is the implementation's own concern.
/// All operations are synchronous and infallible from the frame graph's
/// point of view; device-level failures are the backend's to surface.
pub trait ResourceAllocator {
    /// Create (or fetch from a pool) a texture matching `descriptor`.
    fn create_texture(&mut self, name: &str, descriptor: &TextureDescriptor) -> TextureHandle;

    /// Return a texture previously obtained from `create_texture`.
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Create (or fetch from a pool) a render target over the given
    /// attachments.
    #[allow(clippy::too_many_arguments)]
    fn create_render_target(
        &mut self,
        name: &str,
        targets: AttachmentMask,
        width: u32,
        height: u32,
        samples: u32,
        color: [Option<AttachmentInfo>; MAX_COLOR_ATTACHMENTS],
        depth: Option<AttachmentInfo>,
        stencil: Option<AttachmentInfo>,
    ) -> RenderTargetHandle;

    /// Return a render target previously obtained from
    /// `create_render_target`.
    fn destroy_render_target(&mut self, target: RenderTargetHandle);
}

// ============================================================================
// Pool Allocator
// ============================================================================

/// Everything that makes two render targets interchangeable for pooling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RenderTargetKey {
    targets: AttachmentMask,
    width: u32,
    height: u32,
    samples: u32,
    color: [Option<AttachmentInfo>; MAX_COLOR_ATTACHMENTS],
    depth: Option<AttachmentInfo>,
    stencil: Option<AttachmentInfo>,
}

/// A [`ResourceAllocator`] that pools destroyed objects for reuse.
///
/// Destroyed textures and render targets go onto free lists keyed by their
/// full descriptors; a later `create_*` call with a matching descriptor
/// reuses the pooled object instead of minting a new one. This is the
/// cross-frame reuse strategy a real backend would implement on top of its
/// device, and doubles as the test/bench allocator for this crate.
#[derive(Debug, Default)]
pub struct PoolAllocator {
    next_id: u64,
    free_textures: HashMap<TextureDescriptor, Vec<TextureHandle>>,
    free_targets: HashMap<RenderTargetKey, Vec<RenderTargetHandle>>,
    live_textures: HashMap<TextureHandle, TextureDescriptor>,
    live_targets: HashMap<RenderTargetHandle, RenderTargetKey>,
    created: usize,
    reused: usize,
}

impl PoolAllocator {
    /// Create a new empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of textures currently held by callers.
    pub fn live_textures(&self) -> usize {
        self.live_textures.len()
    }

    /// Number of render targets currently held by callers.
    pub fn live_render_targets(&self) -> usize {
        self.live_targets.len()
    }

    /// Total objects minted (pool misses).
    pub fn created(&self) -> usize {
        self.created
    }

    /// Total objects served from the pool (pool hits).
    pub fn reused(&self) -> usize {
        self.reused
    }

    /// Drop all pooled (free) objects, keeping live ones untouched.
    ///
    /// Returns the number of objects released.
    pub fn purge(&mut self) -> usize {
        let released: usize = self.free_textures.values().map(Vec::len).sum::<usize>()
            + self.free_targets.values().map(Vec::len).sum::<usize>();
        self.free_textures.clear();
        self.free_targets.clear();
        released
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl ResourceAllocator for PoolAllocator {
    fn create_texture(&mut self, name: &str, descriptor: &TextureDescriptor) -> TextureHandle {
        let handle = match self.free_textures.get_mut(descriptor).and_then(Vec::pop) {
            Some(handle) => {
                self.reused += 1;
                log::trace!("texture '{}' served from pool", name);
                handle
            }
            None => {
                self.created += 1;
                log::trace!("texture '{}' created", name);
                TextureHandle(self.next_id())
            }
        };
        self.live_textures.insert(handle, descriptor.clone());
        handle
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        let descriptor = self
            .live_textures
            .remove(&texture)
            .expect("destroy_texture called with a handle this allocator does not own");
        self.free_textures.entry(descriptor).or_default().push(texture);
    }

    fn create_render_target(
        &mut self,
        name: &str,
        targets: AttachmentMask,
        width: u32,
        height: u32,
        samples: u32,
        color: [Option<AttachmentInfo>; MAX_COLOR_ATTACHMENTS],
        depth: Option<AttachmentInfo>,
        stencil: Option<AttachmentInfo>,
    ) -> RenderTargetHandle {
        let key = RenderTargetKey {
            targets,
            width,
            height,
            samples,
            color,
            depth,
            stencil,
        };
        let handle = match self.free_targets.get_mut(&key).and_then(Vec::pop) {
            Some(handle) => {
                self.reused += 1;
                log::trace!("render target '{}' served from pool", name);
                handle
            }
            None => {
                self.created += 1;
                log::trace!("render target '{}' created ({}x{})", name, width, height);
                RenderTargetHandle(self.next_id())
            }
        };
        self.live_targets.insert(handle, key);
        handle
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        let key = self
            .live_targets
            .remove(&target)
            .expect("destroy_render_target called with a handle this allocator does not own");
        self.free_targets.entry(key).or_default().push(target);
    }
}
