//! Shared test utilities for the integration suite.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use framegraph::{
    AttachmentInfo, AttachmentMask, RenderTargetHandle, ResourceAllocator, TextureDescriptor,
    TextureFormat, TextureHandle, TextureUsage, MAX_COLOR_ATTACHMENTS,
};

/// One observable action taken by the frame graph during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CreateTexture(String),
    DestroyTexture(String),
    CreateTarget {
        pass: String,
        width: u32,
        height: u32,
    },
    DestroyTarget(String),
    Execute(String),
}

/// Shared event log, written by both the allocator and pass executors.
pub type EventLog = Rc<RefCell<Vec<Event>>>;

pub fn event_log() -> EventLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// Records an `Execute` event; for use inside pass executors.
pub fn record_execute(log: &EventLog, pass: &str) {
    log.borrow_mut().push(Event::Execute(pass.to_string()));
}

/// A [`ResourceAllocator`] that logs every create/destroy with names, so
/// tests can assert exact lifetime interleavings.
pub struct TrackingAllocator {
    log: EventLog,
    next_id: u64,
    textures: HashMap<TextureHandle, String>,
    targets: HashMap<RenderTargetHandle, String>,
}

impl TrackingAllocator {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            next_id: 0,
            textures: HashMap::new(),
            targets: HashMap::new(),
        }
    }

    pub fn live_objects(&self) -> usize {
        self.textures.len() + self.targets.len()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl ResourceAllocator for TrackingAllocator {
    fn create_texture(&mut self, name: &str, _descriptor: &TextureDescriptor) -> TextureHandle {
        let handle = TextureHandle::from_raw(self.next_id());
        self.textures.insert(handle, name.to_string());
        self.log
            .borrow_mut()
            .push(Event::CreateTexture(name.to_string()));
        handle
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        let name = self
            .textures
            .remove(&texture)
            .expect("destroyed a texture that was never created");
        self.log.borrow_mut().push(Event::DestroyTexture(name));
    }

    fn create_render_target(
        &mut self,
        name: &str,
        _targets: AttachmentMask,
        width: u32,
        height: u32,
        _samples: u32,
        _color: [Option<AttachmentInfo>; MAX_COLOR_ATTACHMENTS],
        _depth: Option<AttachmentInfo>,
        _stencil: Option<AttachmentInfo>,
    ) -> RenderTargetHandle {
        let handle = RenderTargetHandle::from_raw(self.next_id());
        self.targets.insert(handle, name.to_string());
        self.log.borrow_mut().push(Event::CreateTarget {
            pass: name.to_string(),
            width,
            height,
        });
        handle
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        let name = self
            .targets
            .remove(&target)
            .expect("destroyed a render target that was never created");
        self.log.borrow_mut().push(Event::DestroyTarget(name));
    }
}

/// A render-attachment color texture descriptor.
pub fn color_descriptor(width: u32, height: u32) -> TextureDescriptor {
    TextureDescriptor::new_2d(
        width,
        height,
        TextureFormat::Rgba8Unorm,
        TextureUsage::RENDER_ATTACHMENT,
    )
}

/// A color texture that is also sampled by later passes.
pub fn sampled_color_descriptor(width: u32, height: u32) -> TextureDescriptor {
    TextureDescriptor::new_2d(
        width,
        height,
        TextureFormat::Rgba8Unorm,
        TextureUsage::RENDER_ATTACHMENT | TextureUsage::SAMPLED,
    )
}

/// A depth attachment descriptor.
pub fn depth_descriptor(width: u32, height: u32) -> TextureDescriptor {
    TextureDescriptor::new_2d(
        width,
        height,
        TextureFormat::Depth32Float,
        TextureUsage::RENDER_ATTACHMENT,
    )
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
