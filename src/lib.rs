//! # framegraph
//!
//! A frame graph rendering core: declare abstract passes and resources,
//! and let the graph sequence GPU object creation, destruction, and
//! load/store behavior for you.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`FrameGraph`] - Declarative pass/resource declaration with a
//!   two-phase compile (cull + resolve) and execute protocol
//! - [`DependencyGraph`] - The underlying reference-counted DAG
//! - [`ResourceAllocator`] - Trait boundary to the backend that owns
//!   physical GPU objects, with [`PoolAllocator`] as the pooling
//!   implementation used by tests and benchmarks
//!
//! ## Example
//!
//! ```ignore
//! use framegraph::{FrameGraph, PoolAllocator};
//!
//! let mut graph = FrameGraph::new();
//! // declare resources and passes ...
//! graph.present(output);
//! graph.compile();
//! graph.execute(&mut allocator, &mut backend);
//! graph.reset();
//! ```

pub mod allocator;
pub mod graph;
pub mod types;

// Re-export main types for convenience
pub use allocator::{
    AttachmentInfo, PoolAllocator, RenderTargetHandle, ResourceAllocator, TextureHandle,
};
pub use graph::{
    Attachment, Attachments, DependencyGraph, Edge, FrameGraph, FrameGraphState, ImportedTarget,
    NodeId, PassBuilder, PassExecuteContext, PassHandle, RenderTargetConfig,
    RenderTargetDescriptor, RenderTargetParams, ResourceHandle, VirtualResource, VirtualTexture,
};
pub use types::{
    AttachmentMask, ClearValue, TextureDescriptor, TextureFormat, TextureUsage, Viewport,
    MAX_ATTACHMENTS, MAX_COLOR_ATTACHMENTS,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the frame graph subsystem.
///
/// Optional; only emits a startup log line.
pub fn init() {
    log::info!("framegraph v{} initialized", VERSION);
}
