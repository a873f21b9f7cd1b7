//! Frame graph: declaration, compile, and execute.
//!
//! The frame graph lets rendering code declare passes and the resources
//! they touch without sequencing GPU object creation, destruction, or
//! load/store behavior by hand. Declaration builds a dependency graph of
//! passes and resource versions; `compile` culls everything that does not
//! contribute to the presented output and resolves the surviving render
//! targets; `execute` runs passes in declaration order, allocating each
//! pass's outputs just before it runs and releasing them as soon as no
//! later pass needs them.
//!
//! # Architecture
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | **Graph** | [`FrameGraph`] | Declaration, culling, execution (this module) |
//! | Pass | [`PassExecuteContext`] | Single unit of GPU work |
//! | Resource | [`VirtualResource`] | Versioned resource metadata |
//! | DAG | [`DependencyGraph`] | Reference-counted reachability |
//!
//! # Example
//!
//! ```ignore
//! use framegraph::{
//!     Attachment, AttachmentMask, ClearValue, FrameGraph, RenderTargetConfig,
//!     RenderTargetDescriptor, TextureDescriptor, TextureFormat, TextureUsage,
//! };
//!
//! let mut graph = FrameGraph::new();
//! let color = graph.create_texture(
//!     "color",
//!     TextureDescriptor::new_2d(1920, 1080, TextureFormat::Rgba8Unorm,
//!         TextureUsage::RENDER_ATTACHMENT),
//! );
//!
//! graph.add_render_pass(
//!     "main",
//!     |builder| {
//!         builder.add_render_target(
//!             RenderTargetConfig::new(
//!                 RenderTargetDescriptor::new()
//!                     .with_clear(AttachmentMask::COLOR0,
//!                         ClearValue::color(0.0, 0.0, 0.0, 1.0)),
//!             )
//!             .with_color(0, Attachment::new(color)),
//!         );
//!     },
//!     |ctx| {
//!         let params = ctx.render_target(0);
//!         // record GPU work against params.handle ...
//!     },
//! );
//!
//! graph.present(color);
//! graph.compile();
//! graph.execute(&mut allocator, &mut backend);
//! ```

mod dependency;
mod pass;
mod resource;
mod target;

pub use dependency::{DependencyGraph, Edge, NodeId};
pub use pass::{PassExecuteContext, PassHandle};
pub use resource::{ImportedTarget, ResourceHandle, VirtualResource, VirtualTexture};
pub use target::{
    Attachment, Attachments, RenderTargetConfig, RenderTargetDescriptor, RenderTargetParams,
};

use std::any::Any;

use crate::allocator::{RenderTargetHandle, ResourceAllocator};
use crate::types::{AttachmentMask, TextureDescriptor, TextureFormat};

use pass::PassNode;
use resource::{ResourceLifetime, ResourceNode, ResourceNodeIndex};
use target::RenderTargetRecord;

/// Phase of the frame graph protocol.
///
/// Transitions are strictly forward; calling an operation from the wrong
/// state is a programmer error and panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameGraphState {
    /// Passes and resources are being declared.
    Declaring,
    /// Unreachable passes and resources have been removed.
    Culled,
    /// Surviving render targets have computed their parameters.
    Resolved,
    /// Passes are running.
    Executing,
    /// The cycle is complete; `reset` starts the next frame.
    Done,
}

/// Orchestrates one declare/compile/execute cycle.
///
/// A `FrameGraph` exclusively owns its dependency graph, resource
/// registry, and pass list for the duration of one cycle (typically one
/// rendered frame). All phases are driven synchronously by one caller;
/// nothing here locks or suspends.
#[derive(Debug, Default)]
pub struct FrameGraph {
    graph: DependencyGraph,
    resources: Vec<VirtualResource>,
    resource_nodes: Vec<ResourceNode>,
    /// Latest version node per resource.
    versions: Vec<ResourceNodeIndex>,
    passes: Vec<PassNode>,
    lifetimes: Vec<Option<ResourceLifetime>>,
    present: Option<PassHandle>,
    state: FrameGraphState,
}

impl Default for FrameGraphState {
    fn default() -> Self {
        Self::Declaring
    }
}

impl FrameGraph {
    /// Create a new empty frame graph in the `Declaring` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current protocol phase.
    pub fn state(&self) -> FrameGraphState {
        self.state
    }

    /// Get the number of declared passes (present included, once created).
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Get the number of declared resources.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Access a declared resource's metadata.
    pub fn resource(&self, handle: ResourceHandle) -> &VirtualResource {
        &self.resources[handle.index()]
    }

    /// True if `pass` was removed by culling. Only valid after `compile`.
    pub fn is_pass_culled(&self, pass: PassHandle) -> bool {
        self.passes[pass.index()].is_culled()
    }

    /// The resolved parameters of a render pass's target at `index`.
    ///
    /// Only valid after `compile`; used by backends and tests to inspect
    /// load/store decisions.
    pub fn render_target_params(&self, pass: PassHandle, index: usize) -> &RenderTargetParams {
        assert!(
            !matches!(self.state, FrameGraphState::Declaring | FrameGraphState::Culled),
            "render-target parameters are not resolved yet"
        );
        &self.passes[pass.index()].render_targets()[index].params
    }

    // ========================================================================
    // Declaration
    // ========================================================================

    /// Declare a texture resource.
    ///
    /// The descriptor may leave width, height, and sample count unset;
    /// they are resolved when a render-target record binding the texture
    /// is resolved.
    pub fn create_texture(
        &mut self,
        name: impl Into<String>,
        descriptor: TextureDescriptor,
    ) -> ResourceHandle {
        self.assert_state(FrameGraphState::Declaring, "create_texture");
        self.register(VirtualResource::new_texture(name, descriptor))
    }

    /// Declare a caller-owned render target.
    ///
    /// The graph never allocates or frees it; when it is bound as the
    /// first color attachment of a record, `descriptor` and
    /// `discard_start` override everything the graph would compute.
    pub fn import_render_target(
        &mut self,
        name: impl Into<String>,
        descriptor: RenderTargetDescriptor,
        target: RenderTargetHandle,
        discard_start: AttachmentMask,
    ) -> ResourceHandle {
        self.assert_state(FrameGraphState::Declaring, "import_render_target");
        self.register(VirtualResource::new_imported(
            name,
            descriptor,
            target,
            discard_start,
        ))
    }

    fn register(&mut self, resource: VirtualResource) -> ResourceHandle {
        let handle = ResourceHandle::new(self.resources.len() as u32);
        self.resources.push(resource);
        self.lifetimes.push(None);

        let node = self.graph.add_node();
        let index = ResourceNodeIndex::new(self.resource_nodes.len() as u32);
        self.resource_nodes.push(ResourceNode::new(handle, 0, node));
        self.versions.push(index);
        handle
    }

    /// Declare a pass with callback work and no render targets.
    ///
    /// `setup` declares the resources the pass reads and writes;
    /// `execute` runs once during the execute phase if the pass survives
    /// culling.
    pub fn add_compute_pass(
        &mut self,
        name: impl Into<String>,
        setup: impl FnOnce(&mut PassBuilder<'_>),
        execute: impl FnOnce(&mut PassExecuteContext<'_>) + 'static,
    ) -> PassHandle {
        self.assert_state(FrameGraphState::Declaring, "add_compute_pass");
        let node = self.graph.add_node();
        let pass = PassNode::new_compute(name.into(), node, Box::new(execute));
        self.add_pass(pass, setup)
    }

    /// Declare a pass rendering into one or more render targets.
    ///
    /// `setup` must attach at least one render-target record via
    /// [`PassBuilder::add_render_target`].
    pub fn add_render_pass(
        &mut self,
        name: impl Into<String>,
        setup: impl FnOnce(&mut PassBuilder<'_>),
        execute: impl FnOnce(&mut PassExecuteContext<'_>) + 'static,
    ) -> PassHandle {
        self.assert_state(FrameGraphState::Declaring, "add_render_pass");
        let node = self.graph.add_node();
        let pass = PassNode::new_render(name.into(), node, Box::new(execute));
        self.add_pass(pass, setup)
    }

    fn add_pass(&mut self, pass: PassNode, setup: impl FnOnce(&mut PassBuilder<'_>)) -> PassHandle {
        let handle = PassHandle::new(self.passes.len() as u32);
        log::trace!("declared pass '{}'", pass.name());
        self.passes.push(pass);

        let mut builder = PassBuilder {
            frame_graph: self,
            pass: handle,
        };
        setup(&mut builder);
        handle
    }

    /// Declare the terminal present pass, anchored on `input`.
    ///
    /// The present pass is the culling root: only passes with a path to
    /// it survive `compile`. It declares no resources and does no work.
    ///
    /// # Panics
    ///
    /// Panics if `present` has already been called on this graph.
    pub fn present(&mut self, input: ResourceHandle) -> PassHandle {
        self.assert_state(FrameGraphState::Declaring, "present");
        assert!(
            self.present.is_none(),
            "present() has already been called on this graph"
        );
        let handle = self.add_present_node();
        let version = self.versions[input.index()];
        let version_node = self.resource_nodes[version.index()].node();
        self.graph
            .add_edge(version_node, self.passes[handle.index()].node());
        self.resource_nodes[version.index()].add_reader(handle);
        handle
    }

    fn add_present_node(&mut self) -> PassHandle {
        let node = self.graph.add_node();
        let handle = PassHandle::new(self.passes.len() as u32);
        self.passes.push(PassNode::new_present(node));
        self.present = Some(handle);
        handle
    }

    // ------------------------------------------------------------------------
    // Declaration internals used by PassBuilder
    // ------------------------------------------------------------------------

    fn declare_read(&mut self, pass: PassHandle, handle: ResourceHandle) {
        let version = self.versions[handle.index()];
        let version_node = self.resource_nodes[version.index()].node();
        self.graph
            .add_edge(version_node, self.passes[pass.index()].node());
        self.resource_nodes[version.index()].add_reader(pass);
        self.passes[pass.index()].register_resource(handle, &mut self.resources, pass);
    }

    fn declare_write(&mut self, pass: PassHandle, handle: ResourceHandle) -> ResourceNodeIndex {
        let previous = self.versions[handle.index()];
        let version = self.resource_nodes[previous.index()].version() + 1;

        let node = self.graph.add_node();
        let index = ResourceNodeIndex::new(self.resource_nodes.len() as u32);
        let mut resource_node = ResourceNode::new(handle, version, node);
        resource_node.set_writer(pass);
        self.resource_nodes.push(resource_node);
        self.versions[handle.index()] = index;

        self.graph
            .add_edge(self.passes[pass.index()].node(), node);
        self.passes[pass.index()].register_resource(handle, &mut self.resources, pass);
        log::trace!(
            "pass '{}' writes '{}' (version {})",
            self.passes[pass.index()].name(),
            self.resources[handle.index()].name(),
            version
        );
        index
    }

    fn declare_render_target(&mut self, pass: PassHandle, config: RenderTargetConfig) -> usize {
        assert!(
            self.passes[pass.index()].is_render(),
            "pass '{}' is not a render pass",
            self.passes[pass.index()].name()
        );
        assert!(
            config.has_attachments(),
            "render-target record has no bound attachments"
        );

        let mut record = RenderTargetRecord::new(config);
        let bound: Vec<(usize, ResourceHandle, TextureFormat)> = record
            .attachments
            .slots()
            .map(|(slot, _, attachment)| {
                let format = self.resources[attachment.resource.index()]
                    .as_texture()
                    .map(|texture| texture.descriptor().format)
                    .unwrap_or_default();
                (slot, attachment.resource, format)
            })
            .collect();

        for &(slot, resource, format) in &bound {
            if slot == target::DEPTH_SLOT || slot == target::STENCIL_SLOT {
                debug_assert!(
                    self.resources[resource.index()].is_imported()
                        || format.is_depth_stencil(),
                    "attachment '{}' bound to a depth/stencil slot without a depth format",
                    self.resources[resource.index()].name()
                );
            }
            // Binding an attachment depends on the previous version of
            // the resource and produces a new one.
            record.incoming[slot] = Some(self.versions[resource.index()]);
            self.declare_read(pass, resource);
            let written = self.declare_write(pass, resource);
            record.outgoing[slot] = Some(written);
            debug_assert_eq!(self.resource_nodes[written.index()].writer(), Some(pass));
            debug_assert_eq!(self.resource_nodes[written.index()].resource(), resource);
        }

        self.passes[pass.index()].add_record(record)
    }

    // ========================================================================
    // Compile
    // ========================================================================

    /// Cull unreachable passes and resolve the survivors.
    ///
    /// Seeds the reference-counting cull from the present pass, fires
    /// `on_culled` hooks exactly once for removed passes, resolves every
    /// surviving render pass's records in declaration order, and computes
    /// resource lifetimes for the execute phase.
    ///
    /// # Panics
    ///
    /// Panics unless the graph is in the `Declaring` state.
    pub fn compile(&mut self) {
        self.assert_state(FrameGraphState::Declaring, "compile");

        let root = match self.present {
            Some(handle) => handle,
            // A graph presenting nothing culls everything.
            None => self.add_present_node(),
        };
        let root_node = self.passes[root.index()].node();
        self.graph.cull(root_node);
        self.state = FrameGraphState::Culled;

        let mut hooks = Vec::new();
        let mut culled = 0;
        for pass in &mut self.passes {
            if pass.is_present() {
                continue;
            }
            if self.graph.is_culled(pass.node()) {
                pass.set_culled();
                culled += 1;
                if let Some(hook) = pass.take_culled_hook() {
                    hooks.push(hook);
                }
            }
        }
        for hook in hooks {
            hook(&self.graph);
        }
        log::debug!(
            "compiled frame graph: {} of {} passes culled",
            culled,
            self.passes.len()
        );

        // Resolve render targets now that the surviving shape of the
        // graph is known.
        let Self {
            graph,
            passes,
            resource_nodes,
            resources,
            ..
        } = self;
        for pass in passes.iter_mut() {
            if pass.is_culled() {
                continue;
            }
            for record in pass.render_targets_mut() {
                record.resolve(graph, resource_nodes, resources);
            }
        }

        // First/last use per resource over surviving passes, in
        // declaration order. Imported resources never enter the table.
        for (index, pass) in self.passes.iter().enumerate() {
            if pass.is_culled() || pass.is_present() {
                continue;
            }
            for resource_index in pass.declared() {
                if self.resources[resource_index].is_imported() {
                    continue;
                }
                let lifetime = &mut self.lifetimes[resource_index];
                match lifetime {
                    Some(lifetime) => lifetime.last_use = index,
                    None => {
                        *lifetime = Some(ResourceLifetime {
                            first_use: index,
                            last_use: index,
                        })
                    }
                }
            }
        }

        self.state = FrameGraphState::Resolved;
    }

    // ========================================================================
    // Execute
    // ========================================================================

    /// Run the surviving passes in declaration order.
    ///
    /// For each pass: textures entering their first use are allocated,
    /// the pass's render targets are allocated, the callback runs, the
    /// render targets are released, and textures leaving their last use
    /// are released. A render target's physical lifetime therefore spans
    /// exactly the execution of its own pass.
    ///
    /// # Panics
    ///
    /// Panics unless `compile` has run.
    pub fn execute(&mut self, allocator: &mut dyn ResourceAllocator, backend: &mut dyn Any) {
        self.assert_state(FrameGraphState::Resolved, "execute");
        self.state = FrameGraphState::Executing;

        for index in 0..self.passes.len() {
            if self.passes[index].is_culled() || self.passes[index].is_present() {
                continue;
            }

            {
                let Self {
                    lifetimes,
                    resources,
                    ..
                } = self;
                for (resource_index, lifetime) in lifetimes.iter().enumerate() {
                    if lifetime.is_some_and(|lifetime| lifetime.first_use == index) {
                        resources[resource_index].devirtualize(allocator);
                    }
                }
            }

            {
                let Self {
                    passes, resources, ..
                } = self;
                passes[index].devirtualize_targets(resources, allocator);
            }

            if let Some(executor) = self.passes[index].take_executor() {
                log::trace!("executing pass '{}'", self.passes[index].name());
                let mut ctx =
                    PassExecuteContext::new(&self.passes[index], &self.resources, &mut *backend);
                executor(&mut ctx);
            }

            self.passes[index].destroy_targets(allocator);

            {
                let Self {
                    lifetimes,
                    resources,
                    ..
                } = self;
                for (resource_index, lifetime) in lifetimes.iter().enumerate() {
                    if lifetime.is_some_and(|lifetime| lifetime.last_use == index) {
                        resources[resource_index].destroy(allocator);
                    }
                }
            }
        }

        self.state = FrameGraphState::Done;
    }

    /// Clear all declarations and return to `Declaring` for the next
    /// frame, retaining allocations for reuse.
    ///
    /// # Panics
    ///
    /// Panics unless the graph has finished executing.
    pub fn reset(&mut self) {
        self.assert_state(FrameGraphState::Done, "reset");
        self.graph.reset();
        self.resources.clear();
        self.resource_nodes.clear();
        self.versions.clear();
        self.passes.clear();
        self.lifetimes.clear();
        self.present = None;
        self.state = FrameGraphState::Declaring;
    }

    fn assert_state(&self, expected: FrameGraphState, operation: &str) {
        assert!(
            self.state == expected,
            "{}() called in the {:?} state (expected {:?})",
            operation,
            self.state,
            expected
        );
    }
}

// ============================================================================
// Pass Builder
// ============================================================================

/// Declares a pass's resource reads and writes during setup.
///
/// Handed to the `setup` closure of
/// [`add_compute_pass`](FrameGraph::add_compute_pass) and
/// [`add_render_pass`](FrameGraph::add_render_pass).
pub struct PassBuilder<'a> {
    frame_graph: &'a mut FrameGraph,
    pass: PassHandle,
}

impl PassBuilder<'_> {
    /// Declare that the pass reads the current version of `handle`.
    pub fn read(&mut self, handle: ResourceHandle) -> ResourceHandle {
        self.frame_graph.declare_read(self.pass, handle);
        handle
    }

    /// Declare that the pass writes `handle`, producing a new version.
    ///
    /// Later passes reading `handle` depend on this pass.
    pub fn write(&mut self, handle: ResourceHandle) -> ResourceHandle {
        self.frame_graph.declare_write(self.pass, handle);
        handle
    }

    /// Attach a render-target record to the pass.
    ///
    /// Every bound attachment is declared as read (of its previous
    /// version) and written (producing a new version). Returns the record
    /// index, for [`PassExecuteContext::render_target`].
    ///
    /// # Panics
    ///
    /// Panics if the pass is not a render pass or the config binds no
    /// attachments.
    pub fn add_render_target(&mut self, config: RenderTargetConfig) -> usize {
        self.frame_graph.declare_render_target(self.pass, config)
    }

    /// Register a hook fired exactly once if the pass is culled.
    ///
    /// The default is a no-op. Use this to release externally-visible
    /// side effects registered at declaration time.
    pub fn on_culled(&mut self, hook: impl FnOnce(&DependencyGraph) + 'static) {
        self.frame_graph.passes[self.pass.index()].set_culled_hook(Box::new(hook));
    }

    /// The handle of the pass being declared.
    pub fn pass(&self) -> PassHandle {
        self.pass
    }
}
