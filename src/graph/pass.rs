//! Pass nodes and the execute-time resource accessor.
//!
//! A pass is one unit of GPU work. The variant set is closed: compute-like
//! passes wrapping a user callback, render passes that additionally own
//! render-target records, and the single present sentinel that anchors
//! culling. Dispatch happens once per phase over the variant, not through
//! an open inheritance hierarchy.

use std::any::Any;
use std::collections::HashSet;

use crate::allocator::{ResourceAllocator, TextureHandle};
use crate::graph::dependency::{DependencyGraph, NodeId};
use crate::graph::resource::{ResourceHandle, VirtualResource};
use crate::graph::target::{RenderTargetParams, RenderTargetRecord};
use crate::types::TextureDescriptor;

/// Handle to a pass in the frame graph.
///
/// `PassHandle` is `Copy` and cheap to pass around. It is only valid
/// within the `FrameGraph` that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassHandle(u32);

impl PassHandle {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Name of the terminal present pass.
pub(crate) const PRESENT_PASS_NAME: &str = "present";

/// The user callback run when a pass executes.
pub(crate) type PassExecutor = Box<dyn FnOnce(&mut PassExecuteContext<'_>)>;

/// Notification hook fired when a pass is removed by culling.
pub(crate) type CulledHook = Box<dyn FnOnce(&DependencyGraph)>;

pub(crate) enum PassKind {
    /// A pass with callback work and no render targets.
    Compute { executor: Option<PassExecutor> },
    /// A pass rendering into one or more render targets.
    Render {
        executor: Option<PassExecutor>,
        targets: Vec<RenderTargetRecord>,
    },
    /// The terminal sentinel anchoring the cull. No declared resources,
    /// no callback, nothing to resolve.
    Present,
}

impl std::fmt::Debug for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compute { .. } => f.debug_struct("Compute").finish_non_exhaustive(),
            Self::Render { targets, .. } => f
                .debug_struct("Render")
                .field("targets", &targets.len())
                .finish_non_exhaustive(),
            Self::Present => f.write_str("Present"),
        }
    }
}

/// A node in the frame graph representing one unit of GPU work.
pub(crate) struct PassNode {
    name: String,
    node: NodeId,
    declared: HashSet<u32>,
    on_culled: Option<CulledHook>,
    culled: bool,
    kind: PassKind,
}

impl std::fmt::Debug for PassNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassNode")
            .field("name", &self.name)
            .field("node", &self.node)
            .field("declared", &self.declared.len())
            .field("culled", &self.culled)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl PassNode {
    pub(crate) fn new_compute(name: String, node: NodeId, executor: PassExecutor) -> Self {
        Self {
            name,
            node,
            declared: HashSet::new(),
            on_culled: None,
            culled: false,
            kind: PassKind::Compute {
                executor: Some(executor),
            },
        }
    }

    pub(crate) fn new_render(name: String, node: NodeId, executor: PassExecutor) -> Self {
        Self {
            name,
            node,
            declared: HashSet::new(),
            on_culled: None,
            culled: false,
            kind: PassKind::Render {
                executor: Some(executor),
                targets: Vec::new(),
            },
        }
    }

    pub(crate) fn new_present(node: NodeId) -> Self {
        Self {
            name: PRESENT_PASS_NAME.to_string(),
            node,
            declared: HashSet::new(),
            on_culled: None,
            culled: false,
            kind: PassKind::Present,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn is_present(&self) -> bool {
        matches!(self.kind, PassKind::Present)
    }

    pub(crate) fn is_render(&self) -> bool {
        matches!(self.kind, PassKind::Render { .. })
    }

    pub(crate) fn is_culled(&self) -> bool {
        self.culled
    }

    /// Mark the pass as removed by culling and drop its executor, so any
    /// captured state registered at declaration time is released.
    pub(crate) fn set_culled(&mut self) {
        self.culled = true;
        match &mut self.kind {
            PassKind::Compute { executor } | PassKind::Render { executor, .. } => {
                *executor = None;
            }
            PassKind::Present => unreachable!("the present pass is the culling root"),
        }
    }

    /// Record that this pass touches `handle`.
    ///
    /// Duplicate declarations are idempotent; only the first one reaches
    /// the resource's accounting.
    pub(crate) fn register_resource(
        &mut self,
        handle: ResourceHandle,
        resources: &mut [VirtualResource],
        pass: PassHandle,
    ) {
        assert!(
            !self.is_present(),
            "the present pass declares no resources"
        );
        if self.declared.insert(handle.index() as u32) {
            resources[handle.index()].needed_by_pass(pass);
        }
    }

    pub(crate) fn declares(&self, handle: ResourceHandle) -> bool {
        self.declared.contains(&(handle.index() as u32))
    }

    pub(crate) fn declared(&self) -> impl Iterator<Item = usize> + '_ {
        self.declared.iter().map(|&index| index as usize)
    }

    pub(crate) fn set_culled_hook(&mut self, hook: CulledHook) {
        assert!(
            self.on_culled.is_none(),
            "pass '{}' already has a culled hook",
            self.name
        );
        self.on_culled = Some(hook);
    }

    pub(crate) fn take_culled_hook(&mut self) -> Option<CulledHook> {
        self.on_culled.take()
    }

    pub(crate) fn take_executor(&mut self) -> Option<PassExecutor> {
        match &mut self.kind {
            PassKind::Compute { executor } | PassKind::Render { executor, .. } => executor.take(),
            PassKind::Present => None,
        }
    }

    /// Attach a render-target record; returns its index within the pass.
    pub(crate) fn add_record(&mut self, record: RenderTargetRecord) -> usize {
        match &mut self.kind {
            PassKind::Render { targets, .. } => {
                targets.push(record);
                targets.len() - 1
            }
            _ => panic!("pass '{}' is not a render pass", self.name),
        }
    }

    pub(crate) fn render_targets(&self) -> &[RenderTargetRecord] {
        match &self.kind {
            PassKind::Render { targets, .. } => targets,
            _ => &[],
        }
    }

    pub(crate) fn render_targets_mut(&mut self) -> &mut [RenderTargetRecord] {
        match &mut self.kind {
            PassKind::Render { targets, .. } => targets,
            _ => &mut [],
        }
    }

    /// Allocate the physical render targets of this pass's records.
    pub(crate) fn devirtualize_targets(
        &mut self,
        resources: &[VirtualResource],
        allocator: &mut dyn ResourceAllocator,
    ) {
        let name = &self.name;
        if let PassKind::Render { targets, .. } = &mut self.kind {
            for record in targets {
                record.devirtualize(name, resources, allocator);
            }
        }
    }

    /// Release the physical render targets of this pass's records.
    pub(crate) fn destroy_targets(&mut self, allocator: &mut dyn ResourceAllocator) {
        if let PassKind::Render { targets, .. } = &mut self.kind {
            for record in targets {
                record.destroy(allocator);
            }
        }
    }
}

// ============================================================================
// Execute Context
// ============================================================================

/// Read-only accessor handed to a pass's callback during execution.
///
/// Gives the callback the resolved sizes and physical handles of the
/// resources the pass declared, the resolved parameters of its render
/// targets, and the opaque backend surface GPU work is submitted
/// through.
pub struct PassExecuteContext<'a> {
    pass: &'a PassNode,
    resources: &'a [VirtualResource],
    backend: &'a mut dyn Any,
}

impl<'a> PassExecuteContext<'a> {
    pub(crate) fn new(
        pass: &'a PassNode,
        resources: &'a [VirtualResource],
        backend: &'a mut dyn Any,
    ) -> Self {
        Self {
            pass,
            resources,
            backend,
        }
    }

    /// The name of the executing pass.
    pub fn pass_name(&self) -> &str {
        self.pass.name()
    }

    /// Get the backend surface as a concrete type.
    pub fn backend<B: 'static>(&mut self) -> Option<&mut B> {
        self.backend.downcast_mut::<B>()
    }

    /// The physical texture backing a declared resource.
    ///
    /// # Panics
    ///
    /// Panics if the pass did not declare the resource, or if the
    /// resource has no physical backing (imported targets are reached
    /// through [`render_target`](Self::render_target) instead).
    pub fn texture(&self, handle: ResourceHandle) -> TextureHandle {
        assert!(
            self.pass.declares(handle),
            "pass '{}' did not declare resource '{}'",
            self.pass.name(),
            self.resources[handle.index()].name()
        );
        self.resources[handle.index()]
            .as_texture()
            .and_then(|texture| texture.physical())
            .unwrap_or_else(|| {
                panic!(
                    "resource '{}' has no physical texture",
                    self.resources[handle.index()].name()
                )
            })
    }

    /// The resolved descriptor of a declared texture resource.
    ///
    /// # Panics
    ///
    /// Panics if the pass did not declare the resource or the resource is
    /// not a texture.
    pub fn descriptor(&self, handle: ResourceHandle) -> &TextureDescriptor {
        assert!(
            self.pass.declares(handle),
            "pass '{}' did not declare resource '{}'",
            self.pass.name(),
            self.resources[handle.index()].name()
        );
        self.resources[handle.index()]
            .as_texture()
            .map(|texture| texture.descriptor())
            .unwrap_or_else(|| {
                panic!(
                    "resource '{}' is not a texture",
                    self.resources[handle.index()].name()
                )
            })
    }

    /// The resolved parameters of the pass's render target at `index`.
    ///
    /// # Panics
    ///
    /// Panics if this is not a render pass or `index` is out of range.
    pub fn render_target(&self, index: usize) -> &RenderTargetParams {
        let targets = self.pass.render_targets();
        assert!(
            index < targets.len(),
            "pass '{}' has {} render targets, index {} out of range",
            self.pass.name(),
            targets.len(),
            index
        );
        &targets[index].params
    }
}
