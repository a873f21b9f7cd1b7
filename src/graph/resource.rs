//! Virtual resources and their versioned graph nodes.
//!
//! A virtual resource is pure metadata until a pass actually needs its
//! physical backing. Each write to a resource produces a new *version*,
//! modeled as its own [`ResourceNode`] in the dependency graph, so that
//! "who reads what this pass wrote" and "who wrote what this pass reads"
//! are plain edge queries.

use crate::allocator::{RenderTargetHandle, ResourceAllocator, TextureHandle};
use crate::graph::dependency::{DependencyGraph, NodeId};
use crate::graph::pass::PassHandle;
use crate::graph::target::RenderTargetDescriptor;
use crate::types::{AttachmentMask, TextureDescriptor};

/// Handle to a virtual resource in the frame graph.
///
/// `ResourceHandle` is `Copy` and cheap to pass around. It is only valid
/// within the `FrameGraph` that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(u32);

impl ResourceHandle {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a resource version node in the frame graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResourceNodeIndex(u32);

impl ResourceNodeIndex {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// Virtual Resource
// ============================================================================

/// A texture resource that may not yet have a physical backing.
#[derive(Debug)]
pub struct VirtualTexture {
    name: String,
    descriptor: TextureDescriptor,
    ref_count: u32,
    physical: Option<TextureHandle>,
}

impl VirtualTexture {
    fn new(name: String, descriptor: TextureDescriptor) -> Self {
        Self {
            name,
            descriptor,
            ref_count: 0,
            physical: None,
        }
    }

    /// The logical name given at declaration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The (possibly still partially unset) descriptor.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub(crate) fn descriptor_mut(&mut self) -> &mut TextureDescriptor {
        &mut self.descriptor
    }

    /// The physical backing, once devirtualized.
    pub fn physical(&self) -> Option<TextureHandle> {
        self.physical
    }

    /// Allocate the physical backing from the allocator.
    ///
    /// # Panics
    ///
    /// Panics if the descriptor still has an unresolved auto size; a
    /// texture that reaches allocation without any attachment to infer
    /// its size from is a declaration error.
    pub(crate) fn devirtualize(&mut self, allocator: &mut dyn ResourceAllocator) {
        assert!(
            self.descriptor.width > 0 && self.descriptor.height > 0,
            "texture '{}' reached allocation with an unresolved auto size",
            self.name
        );
        debug_assert!(self.physical.is_none(), "texture devirtualized twice");
        if self.descriptor.sample_count == 0 {
            self.descriptor.sample_count = 1;
        }
        self.physical = Some(allocator.create_texture(&self.name, &self.descriptor));
        log::trace!("devirtualized texture '{}'", self.name);
    }

    /// Return the physical backing to the allocator.
    pub(crate) fn destroy(&mut self, allocator: &mut dyn ResourceAllocator) {
        if let Some(handle) = self.physical.take() {
            allocator.destroy_texture(handle);
            log::trace!("destroyed texture '{}'", self.name);
        }
    }
}

/// A render target supplied by the caller, outside graph-managed lifetime.
///
/// When an imported target is bound as the first color attachment of a
/// render-target record, its descriptor, physical handle, and
/// discard-at-start mask replace everything the graph would otherwise
/// compute for that record.
#[derive(Debug)]
pub struct ImportedTarget {
    name: String,
    descriptor: RenderTargetDescriptor,
    target: RenderTargetHandle,
    discard_start: AttachmentMask,
}

impl ImportedTarget {
    /// The logical name given at import.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The caller-supplied render-target descriptor.
    pub fn descriptor(&self) -> &RenderTargetDescriptor {
        &self.descriptor
    }

    /// The caller-supplied physical render target.
    pub fn target(&self) -> RenderTargetHandle {
        self.target
    }

    /// The caller-declared discard-at-start set.
    pub fn discard_start(&self) -> AttachmentMask {
        self.discard_start
    }
}

/// A resource declared through the frame graph builder.
///
/// The variant set is closed: graph-owned textures, which are
/// devirtualized and destroyed around the passes that use them, and
/// imported targets, which the graph never allocates or frees.
#[derive(Debug)]
pub enum VirtualResource {
    /// A graph-owned texture.
    Texture(VirtualTexture),
    /// A caller-owned render target.
    Imported(ImportedTarget),
}

impl VirtualResource {
    pub(crate) fn new_texture(name: impl Into<String>, descriptor: TextureDescriptor) -> Self {
        Self::Texture(VirtualTexture::new(name.into(), descriptor))
    }

    pub(crate) fn new_imported(
        name: impl Into<String>,
        descriptor: RenderTargetDescriptor,
        target: RenderTargetHandle,
        discard_start: AttachmentMask,
    ) -> Self {
        Self::Imported(ImportedTarget {
            name: name.into(),
            descriptor,
            target,
            discard_start,
        })
    }

    /// The logical name of the resource.
    pub fn name(&self) -> &str {
        match self {
            Self::Texture(texture) => texture.name(),
            Self::Imported(imported) => imported.name(),
        }
    }

    /// True if this resource is caller-owned.
    pub fn is_imported(&self) -> bool {
        matches!(self, Self::Imported(_))
    }

    /// Downcast to an imported target, if this resource is one.
    ///
    /// Used by the render-target resolve step; graph-owned textures
    /// return `None`.
    pub fn as_imported_target(&self) -> Option<&ImportedTarget> {
        match self {
            Self::Imported(imported) => Some(imported),
            Self::Texture(_) => None,
        }
    }

    /// Get this resource as a texture, if it is one.
    pub fn as_texture(&self) -> Option<&VirtualTexture> {
        match self {
            Self::Texture(texture) => Some(texture),
            Self::Imported(_) => None,
        }
    }

    pub(crate) fn as_texture_mut(&mut self) -> Option<&mut VirtualTexture> {
        match self {
            Self::Texture(texture) => Some(texture),
            Self::Imported(_) => None,
        }
    }

    /// Declaration-time accounting: a pass declared interest in this
    /// resource. Reader/writer relationships are recorded per version on
    /// the resource nodes.
    pub(crate) fn needed_by_pass(&mut self, pass: PassHandle) {
        let _ = pass;
        if let Self::Texture(texture) = self {
            texture.ref_count += 1;
        }
    }

    /// How many passes declared interest during declaration.
    pub fn ref_count(&self) -> u32 {
        match self {
            Self::Texture(texture) => texture.ref_count,
            Self::Imported(_) => 0,
        }
    }

    pub(crate) fn devirtualize(&mut self, allocator: &mut dyn ResourceAllocator) {
        match self {
            Self::Texture(texture) => texture.devirtualize(allocator),
            Self::Imported(imported) => {
                unreachable!("imported target '{}' is never devirtualized", imported.name())
            }
        }
    }

    pub(crate) fn destroy(&mut self, allocator: &mut dyn ResourceAllocator) {
        match self {
            Self::Texture(texture) => texture.destroy(allocator),
            Self::Imported(imported) => {
                unreachable!("imported target '{}' is never destroyed", imported.name())
            }
        }
    }
}

// ============================================================================
// Resource Node
// ============================================================================

/// One version of a virtual resource: its state immediately after some
/// pass wrote it (version 0 is the state at declaration).
#[derive(Debug)]
pub(crate) struct ResourceNode {
    resource: ResourceHandle,
    version: u32,
    node: NodeId,
    readers: Vec<PassHandle>,
    writer: Option<PassHandle>,
}

impl ResourceNode {
    pub(crate) fn new(resource: ResourceHandle, version: u32, node: NodeId) -> Self {
        Self {
            resource,
            version,
            node,
            readers: Vec::new(),
            writer: None,
        }
    }

    pub(crate) fn resource(&self) -> ResourceHandle {
        self.resource
    }

    pub(crate) fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn add_reader(&mut self, pass: PassHandle) {
        self.readers.push(pass);
    }

    /// Record the pass that produced this version.
    ///
    /// # Panics
    ///
    /// Panics if a writer was already recorded; a version has exactly
    /// one producer.
    pub(crate) fn set_writer(&mut self, pass: PassHandle) {
        assert!(
            self.writer.is_none(),
            "resource version has at most one writer"
        );
        self.writer = Some(pass);
    }

    /// Declared readers of this version (for debugging/visualization).
    #[allow(dead_code)]
    pub(crate) fn readers(&self) -> &[PassHandle] {
        &self.readers
    }

    pub(crate) fn writer(&self) -> Option<PassHandle> {
        self.writer
    }

    /// True if at least one surviving pass reads this version.
    pub(crate) fn has_active_readers(&self, graph: &DependencyGraph) -> bool {
        graph
            .outgoing_edges(self.node)
            .any(|edge| !graph.is_culled(edge.to))
    }

    /// True if a surviving pass produced this version.
    pub(crate) fn has_active_writers(&self, graph: &DependencyGraph) -> bool {
        graph
            .incoming_edges(self.node)
            .any(|edge| !graph.is_culled(edge.from))
    }
}

/// First and last use of a resource, in pass declaration order.
///
/// Computed over surviving passes only; a resource touched exclusively by
/// culled passes never enters the lifetime table and is never allocated.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResourceLifetime {
    pub first_use: usize,
    pub last_use: usize,
}
