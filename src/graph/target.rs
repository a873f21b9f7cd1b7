//! Render-target records: declaration, resolve, and physical lifetime.
//!
//! A render pass owns one record per render target it writes. The record
//! starts as a declarative description (attachments + descriptor) and is
//! *resolved* after culling, when the surviving shape of the graph is
//! known: that is when load/store behavior, the effective viewport, and
//! sample counts are decided. During execution the record is
//! *devirtualized* into a physical render target immediately before its
//! pass runs and destroyed immediately after.

use static_assertions::const_assert_eq;

use crate::allocator::{AttachmentInfo, RenderTargetHandle, ResourceAllocator};
use crate::graph::dependency::DependencyGraph;
use crate::graph::resource::{ResourceHandle, ResourceNode, ResourceNodeIndex, VirtualResource};
use crate::types::{
    AttachmentMask, ClearValue, TextureUsage, Viewport, MAX_ATTACHMENTS, MAX_COLOR_ATTACHMENTS,
};

// Slot numbering used throughout: color attachments take slots 0..4,
// depth and stencil the last two.
pub(crate) const DEPTH_SLOT: usize = MAX_COLOR_ATTACHMENTS;
pub(crate) const STENCIL_SLOT: usize = MAX_COLOR_ATTACHMENTS + 1;
const_assert_eq!(STENCIL_SLOT, MAX_ATTACHMENTS - 1);

// ============================================================================
// Attachments
// ============================================================================

/// A single attachment binding: which resource, and where in it.
#[derive(Debug, Clone, Copy)]
pub struct Attachment {
    /// The bound resource.
    pub resource: ResourceHandle,
    /// Mip level rendered to (default: 0).
    pub mip_level: u32,
    /// Array layer rendered to (default: 0).
    pub layer: u32,
}

impl Attachment {
    /// Bind a resource at mip 0, layer 0.
    pub fn new(resource: ResourceHandle) -> Self {
        Self {
            resource,
            mip_level: 0,
            layer: 0,
        }
    }

    /// Set the mip level to render to.
    pub fn with_mip_level(mut self, mip_level: u32) -> Self {
        self.mip_level = mip_level;
        self
    }

    /// Set the array layer to render to.
    pub fn with_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }
}

/// The attachment slots of a render-target record.
#[derive(Debug, Clone, Copy, Default)]
pub struct Attachments {
    /// Color attachment slots.
    pub color: [Option<Attachment>; MAX_COLOR_ATTACHMENTS],
    /// Depth attachment.
    pub depth: Option<Attachment>,
    /// Stencil attachment.
    pub stencil: Option<Attachment>,
}

impl Attachments {
    /// Iterate over the bound slots as (slot index, mask bit, attachment).
    pub(crate) fn slots(&self) -> impl Iterator<Item = (usize, AttachmentMask, &Attachment)> + '_ {
        self.color
            .iter()
            .enumerate()
            .filter_map(|(slot, attachment)| {
                attachment
                    .as_ref()
                    .map(|attachment| (slot, AttachmentMask::color_slot(slot), attachment))
            })
            .chain(
                self.depth
                    .as_ref()
                    .map(|attachment| (DEPTH_SLOT, AttachmentMask::DEPTH, attachment)),
            )
            .chain(
                self.stencil
                    .as_ref()
                    .map(|attachment| (STENCIL_SLOT, AttachmentMask::STENCIL, attachment)),
            )
    }

    /// The mask of bound slots.
    pub fn mask(&self) -> AttachmentMask {
        self.slots()
            .fold(AttachmentMask::empty(), |mask, (_, bit, _)| mask | bit)
    }
}

// ============================================================================
// Descriptor and Config
// ============================================================================

/// Requested parameters for a render-target record.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderTargetDescriptor {
    /// Region rendered to; an unset width/height is inferred from the
    /// bound attachments at resolve time.
    pub viewport: Viewport,
    /// Attachments to clear at the start of the pass.
    pub clear_flags: AttachmentMask,
    /// Values used for cleared attachments.
    pub clear_value: ClearValue,
    /// Sample count (`0` = unspecified).
    pub samples: u32,
}

impl RenderTargetDescriptor {
    /// Create a descriptor with everything unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit viewport.
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Request a clear of the given attachments.
    pub fn with_clear(mut self, flags: AttachmentMask, value: ClearValue) -> Self {
        self.clear_flags = flags;
        self.clear_value = value;
        self
    }

    /// Set the sample count.
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }
}

/// Declarative description of one render target: descriptor plus bound
/// attachment slots. Built by client code and handed to the pass builder.
#[derive(Debug, Clone, Default)]
pub struct RenderTargetConfig {
    /// Requested parameters.
    pub descriptor: RenderTargetDescriptor,
    /// Bound attachment slots.
    pub attachments: Attachments,
}

impl RenderTargetConfig {
    /// Create a config from a descriptor with no attachments bound.
    pub fn new(descriptor: RenderTargetDescriptor) -> Self {
        Self {
            descriptor,
            attachments: Attachments::default(),
        }
    }

    /// Bind a color attachment slot.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= MAX_COLOR_ATTACHMENTS` or the slot is taken.
    pub fn with_color(mut self, slot: usize, attachment: Attachment) -> Self {
        assert!(
            slot < MAX_COLOR_ATTACHMENTS,
            "color attachment slot {slot} out of range"
        );
        assert!(
            self.attachments.color[slot].is_none(),
            "color attachment slot {slot} bound twice"
        );
        self.attachments.color[slot] = Some(attachment);
        self
    }

    /// Bind the depth attachment.
    pub fn with_depth(mut self, attachment: Attachment) -> Self {
        assert!(self.attachments.depth.is_none(), "depth attachment bound twice");
        self.attachments.depth = Some(attachment);
        self
    }

    /// Bind the stencil attachment.
    pub fn with_stencil(mut self, attachment: Attachment) -> Self {
        assert!(
            self.attachments.stencil.is_none(),
            "stencil attachment bound twice"
        );
        self.attachments.stencil = Some(attachment);
        self
    }

    /// Check if this config has any attachments.
    pub fn has_attachments(&self) -> bool {
        !self.attachments.mask().is_empty()
    }
}

// ============================================================================
// Resolved Parameters and Record
// ============================================================================

/// Backend-facing parameters of a render-target record, computed at
/// resolve time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderTargetParams {
    /// Mask of bound attachment slots.
    pub target_mask: AttachmentMask,
    /// Attachments whose previous content need not be loaded.
    pub discard_start: AttachmentMask,
    /// Attachments whose content need not be stored.
    pub discard_end: AttachmentMask,
    /// Attachments cleared at the start of the pass.
    pub clear_mask: AttachmentMask,
    /// Values used for cleared attachments.
    pub clear_value: ClearValue,
    /// The resolved viewport.
    pub viewport: Viewport,
    /// The resolved sample count.
    pub samples: u32,
    /// The physical render target, once devirtualized.
    pub handle: Option<RenderTargetHandle>,
}

/// One render target owned by a render pass, from declaration through
/// resolve to its per-pass physical lifetime.
#[derive(Debug)]
pub(crate) struct RenderTargetRecord {
    pub(crate) descriptor: RenderTargetDescriptor,
    pub(crate) attachments: Attachments,
    /// Per-slot resource version visible before this pass writes.
    pub(crate) incoming: [Option<ResourceNodeIndex>; MAX_ATTACHMENTS],
    /// Per-slot resource version produced by this pass.
    pub(crate) outgoing: [Option<ResourceNodeIndex>; MAX_ATTACHMENTS],
    /// Set when the first color attachment is an imported target.
    pub(crate) imported: bool,
    pub(crate) params: RenderTargetParams,
}

impl RenderTargetRecord {
    pub(crate) fn new(config: RenderTargetConfig) -> Self {
        Self {
            descriptor: config.descriptor,
            attachments: config.attachments,
            incoming: [None; MAX_ATTACHMENTS],
            outgoing: [None; MAX_ATTACHMENTS],
            imported: false,
            params: RenderTargetParams::default(),
        }
    }

    /// Compute the backend-facing parameters from the post-culling graph.
    ///
    /// Runs once per surviving pass during compile; calling it again with
    /// unchanged inputs produces identical parameters.
    pub(crate) fn resolve(
        &mut self,
        graph: &DependencyGraph,
        nodes: &[ResourceNode],
        resources: &mut [VirtualResource],
    ) {
        let target_mask = self.attachments.mask();
        assert!(
            !target_mask.is_empty(),
            "render-target record has no bound attachments"
        );

        // Every bound attachment starts out discardable at both ends; an
        // attachment only loads or stores when a surviving neighbor
        // actually needs its content.
        let mut discard_start = target_mask;
        let mut discard_end = target_mask;

        let mut min_width = u32::MAX;
        let mut min_height = u32::MAX;
        let mut max_width = 0u32;
        let mut max_height = 0u32;

        for (slot, bit, attachment) in self.attachments.slots() {
            if let Some(written) = self.outgoing[slot] {
                if nodes[written.index()].has_active_readers(graph) {
                    discard_end -= bit;
                }
            }
            if let Some(previous) = self.incoming[slot] {
                if nodes[previous.index()].has_active_writers(graph) {
                    discard_start -= bit;
                }
            }

            if let Some(texture) = resources[attachment.resource.index()].as_texture_mut() {
                let descriptor = texture.descriptor_mut();
                if descriptor.sample_count == 0
                    && !descriptor.usage.contains(TextureUsage::SAMPLED)
                {
                    descriptor.sample_count = self.descriptor.samples;
                }
                min_width = min_width.min(descriptor.width);
                min_height = min_height.min(descriptor.height);
                max_width = max_width.max(descriptor.width);
                max_height = max_height.max(descriptor.height);
            }
        }

        // A cleared attachment never loads its previous content.
        discard_start |= self.descriptor.clear_flags & target_mask;

        // Grow the viewport to the union of the attachment sizes when it
        // was left unset.
        if min_width != u32::MAX && (min_width != max_width || min_height != max_height) {
            log::debug!(
                "attachment sizes disagree; growing render target to {}x{}",
                max_width,
                max_height
            );
        }
        if self.descriptor.viewport.width == 0 {
            self.descriptor.viewport.width = max_width;
        }
        if self.descriptor.viewport.height == 0 {
            self.descriptor.viewport.height = max_height;
        }

        // An imported first color attachment overrides everything the
        // graph computed: the caller controls that target's lifetime and
        // load/store semantics.
        self.imported = false;
        let mut imported_discard_start = None;
        if let Some(color0) = &self.attachments.color[0] {
            if let Some(imported) = resources[color0.resource.index()].as_imported_target() {
                self.imported = true;
                self.descriptor = *imported.descriptor();
                self.params.handle = Some(imported.target());
                imported_discard_start = Some(imported.discard_start() & target_mask);
            }
        }

        self.params.target_mask = target_mask;
        self.params.discard_start = imported_discard_start.unwrap_or(discard_start);
        self.params.discard_end = discard_end;
        self.params.clear_mask = self.descriptor.clear_flags & target_mask;
        self.params.clear_value = self.descriptor.clear_value;
        self.params.viewport = self.descriptor.viewport;
        self.params.samples = self.descriptor.samples;

        // Attachments declared with an auto size adopt the resolved
        // viewport, so their later allocation is fully specified.
        if !self.imported {
            for (_, _, attachment) in self.attachments.slots() {
                if let Some(texture) = resources[attachment.resource.index()].as_texture_mut() {
                    let descriptor = texture.descriptor_mut();
                    if descriptor.width == 0 {
                        descriptor.width = self.params.viewport.width;
                    }
                    if descriptor.height == 0 {
                        descriptor.height = self.params.viewport.height;
                    }
                }
            }
        }
    }

    /// Request the physical render target from the allocator.
    ///
    /// The backing texture of every bound attachment must already have
    /// been devirtualized by its producing pass. Imported records are a
    /// no-op: the physical object already exists.
    pub(crate) fn devirtualize(
        &mut self,
        pass_name: &str,
        resources: &[VirtualResource],
        allocator: &mut dyn ResourceAllocator,
    ) {
        if self.imported {
            return;
        }

        let mut color = [None; MAX_COLOR_ATTACHMENTS];
        let mut depth = None;
        let mut stencil = None;
        for (slot, _, attachment) in self.attachments.slots() {
            let resource = &resources[attachment.resource.index()];
            let texture = resource
                .as_texture()
                .and_then(|texture| texture.physical())
                .unwrap_or_else(|| {
                    panic!(
                        "attachment '{}' of pass '{}' has no physical backing",
                        resource.name(),
                        pass_name
                    )
                });
            let info = AttachmentInfo {
                texture,
                mip_level: attachment.mip_level,
                layer: attachment.layer,
            };
            match slot {
                DEPTH_SLOT => depth = Some(info),
                STENCIL_SLOT => stencil = Some(info),
                _ => color[slot] = Some(info),
            }
        }

        self.params.handle = Some(allocator.create_render_target(
            pass_name,
            self.params.target_mask,
            self.params.viewport.width,
            self.params.viewport.height,
            self.params.samples.max(1),
            color,
            depth,
            stencil,
        ));
    }

    /// Return the physical render target to the allocator.
    ///
    /// Imported records are a no-op: ownership is external.
    pub(crate) fn destroy(&mut self, allocator: &mut dyn ResourceAllocator) {
        if self.imported {
            return;
        }
        if let Some(handle) = self.params.handle.take() {
            allocator.destroy_render_target(handle);
        }
    }
}
