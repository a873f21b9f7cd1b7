//! Common types and descriptors shared across the frame graph.
//!
//! This module contains format enums, usage flags, and descriptor structs
//! used by resource declarations and render-target records.

mod common;
mod texture;

pub use common::{
    AttachmentMask, ClearValue, Viewport, MAX_ATTACHMENTS, MAX_COLOR_ATTACHMENTS,
};
pub use texture::{TextureDescriptor, TextureFormat, TextureUsage};
