//! Integration tests for the frame graph compile/execute protocol.
//!
//! These tests drive the public API end to end with a tracking allocator,
//! asserting culling behavior, load/store decisions, and the exact
//! interleaving of allocation, execution, and release.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use rstest::rstest;

use common::{
    color_descriptor, depth_descriptor, event_log, init_logging, record_execute,
    sampled_color_descriptor, Event, TrackingAllocator,
};
use framegraph::{
    Attachment, AttachmentMask, ClearValue, FrameGraph, FrameGraphState, PoolAllocator,
    RenderTargetConfig, RenderTargetDescriptor, RenderTargetHandle, TextureDescriptor,
    TextureFormat, TextureUsage, Viewport,
};

// ============================================================================
// Culling
// ============================================================================

/// A pass whose output never reaches the present node is removed: its
/// executor never runs, its culled hook fires exactly once, and its
/// resources are never allocated.
#[test]
fn test_unreachable_pass_is_culled() {
    init_logging();
    let log = event_log();
    let mut allocator = TrackingAllocator::new(Rc::clone(&log));

    let mut graph = FrameGraph::new();
    let color = graph.create_texture("color", color_descriptor(256, 256));

    let culled_count = Rc::new(Cell::new(0u32));
    let hook_count = Rc::clone(&culled_count);
    let exec_log = Rc::clone(&log);
    graph.add_render_pass(
        "dead",
        |builder| {
            builder.add_render_target(
                RenderTargetConfig::new(RenderTargetDescriptor::new().with_clear(
                    AttachmentMask::COLOR0,
                    ClearValue::color(0.0, 0.0, 0.0, 1.0),
                ))
                .with_color(0, Attachment::new(color)),
            );
            builder.on_culled(move |_| hook_count.set(hook_count.get() + 1));
        },
        move |ctx| record_execute(&exec_log, ctx.pass_name()),
    );

    // Nothing is presented; the whole graph is dead code.
    graph.compile();
    graph.execute(&mut allocator, &mut ());

    assert_eq!(culled_count.get(), 1);
    assert!(log.borrow().is_empty());
    assert_eq!(allocator.live_objects(), 0);
}

#[test]
fn test_culling_keeps_contributing_chain() {
    init_logging();
    let log = event_log();
    let mut allocator = TrackingAllocator::new(Rc::clone(&log));

    let mut graph = FrameGraph::new();
    let a = graph.create_texture("a", sampled_color_descriptor(64, 64));
    let b = graph.create_texture("b", sampled_color_descriptor(64, 64));
    let c = graph.create_texture("c", color_descriptor(64, 64));
    let orphan = graph.create_texture("orphan", sampled_color_descriptor(64, 64));
    let orphan2 = graph.create_texture("orphan2", color_descriptor(64, 64));

    let hooks = Rc::new(Cell::new(0u32));

    let exec = Rc::clone(&log);
    graph.add_compute_pass(
        "first",
        |builder| {
            builder.write(a);
        },
        move |ctx| record_execute(&exec, ctx.pass_name()),
    );
    let exec = Rc::clone(&log);
    graph.add_compute_pass(
        "second",
        |builder| {
            builder.read(a);
            builder.write(b);
        },
        move |ctx| record_execute(&exec, ctx.pass_name()),
    );
    let exec = Rc::clone(&log);
    graph.add_compute_pass(
        "third",
        |builder| {
            builder.read(b);
            builder.write(c);
        },
        move |ctx| record_execute(&exec, ctx.pass_name()),
    );

    // A two-pass chain that feeds nothing.
    let exec = Rc::clone(&log);
    let hook = Rc::clone(&hooks);
    let dead_a = graph.add_compute_pass(
        "dead_a",
        |builder| {
            builder.write(orphan);
            builder.on_culled(move |_| hook.set(hook.get() + 1));
        },
        move |ctx| record_execute(&exec, ctx.pass_name()),
    );
    let exec = Rc::clone(&log);
    let hook = Rc::clone(&hooks);
    let dead_b = graph.add_compute_pass(
        "dead_b",
        |builder| {
            builder.read(orphan);
            builder.write(orphan2);
            builder.on_culled(move |_| hook.set(hook.get() + 1));
        },
        move |ctx| record_execute(&exec, ctx.pass_name()),
    );

    graph.present(c);
    graph.compile();

    assert!(graph.is_pass_culled(dead_a));
    assert!(graph.is_pass_culled(dead_b));
    assert_eq!(hooks.get(), 2);

    graph.execute(&mut allocator, &mut ());

    let executed: Vec<String> = log
        .borrow()
        .iter()
        .filter_map(|event| match event {
            Event::Execute(name) => Some(name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(executed, vec!["first", "second", "third"]);
}

// ============================================================================
// Load/store decisions
// ============================================================================

/// A downstream reader forces the producer to store its attachment; an
/// attachment with no prior writer is never loaded.
#[test]
fn test_store_needed_by_downstream_reader() {
    init_logging();
    let log = event_log();
    let mut allocator = TrackingAllocator::new(Rc::clone(&log));

    let mut graph = FrameGraph::new();
    let color = graph.create_texture("color", sampled_color_descriptor(128, 128));
    let output = graph.create_texture("output", color_descriptor(128, 128));

    let exec = Rc::clone(&log);
    let producer = graph.add_render_pass(
        "producer",
        |builder| {
            builder.add_render_target(
                RenderTargetConfig::new(RenderTargetDescriptor::new())
                    .with_color(0, Attachment::new(color)),
            );
        },
        move |ctx| record_execute(&exec, ctx.pass_name()),
    );
    let exec = Rc::clone(&log);
    graph.add_compute_pass(
        "consumer",
        |builder| {
            builder.read(color);
            builder.write(output);
        },
        move |ctx| record_execute(&exec, ctx.pass_name()),
    );
    graph.present(output);

    graph.compile();

    let params = graph.render_target_params(producer, 0);
    assert!(!params.discard_end.contains(AttachmentMask::COLOR0));
    assert!(params.discard_start.contains(AttachmentMask::COLOR0));

    graph.execute(&mut allocator, &mut ());

    // The producer's texture outlives its pass (the consumer reads it),
    // but is released immediately after the consumer runs.
    let events = log.borrow();
    let expected = vec![
        Event::CreateTexture("color".to_string()),
        Event::CreateTarget {
            pass: "producer".to_string(),
            width: 128,
            height: 128,
        },
        Event::Execute("producer".to_string()),
        Event::DestroyTarget("producer".to_string()),
        Event::CreateTexture("output".to_string()),
        Event::Execute("consumer".to_string()),
        Event::DestroyTexture("color".to_string()),
        Event::DestroyTexture("output".to_string()),
    ];
    assert_eq!(*events, expected);
}

/// Clear always wins over a prior writer: the attachment bit stays in the
/// discard-at-start mask.
#[rstest]
#[case::color0(0)]
#[case::color2(2)]
fn test_clear_implies_discard_start_for_color_slot(#[case] slot: usize) {
    init_logging();
    let mut graph = FrameGraph::new();
    let color = graph.create_texture("color", color_descriptor(64, 64));
    let other = graph.create_texture("other", color_descriptor(64, 64));
    let bit = AttachmentMask::color_slot(slot);

    graph.add_render_pass(
        "first",
        |builder| {
            builder.add_render_target(
                RenderTargetConfig::new(RenderTargetDescriptor::new())
                    .with_color(slot, Attachment::new(color)),
            );
        },
        |_| {},
    );
    let second = graph.add_render_pass(
        "second",
        |builder| {
            builder.add_render_target(
                RenderTargetConfig::new(
                    RenderTargetDescriptor::new()
                        .with_clear(bit, ClearValue::color(0.0, 0.0, 0.0, 1.0)),
                )
                .with_color(slot, Attachment::new(color))
                .with_color((slot + 1) % 4, Attachment::new(other)),
            );
        },
        |_| {},
    );
    graph.present(color);

    graph.compile();

    let params = graph.render_target_params(second, 0);
    assert!(params.discard_start.contains(bit));
    assert!(params.clear_mask.contains(bit));
    // The uncleared attachment is unaffected.
    assert!(!params.clear_mask.contains(AttachmentMask::color_slot((slot + 1) % 4)));
}

#[test]
fn test_clear_implies_discard_start_for_depth() {
    init_logging();
    let mut graph = FrameGraph::new();
    let color = graph.create_texture("color", color_descriptor(64, 64));
    let depth = graph.create_texture("depth", depth_descriptor(64, 64));

    graph.add_render_pass(
        "prepass",
        |builder| {
            builder.add_render_target(
                RenderTargetConfig::new(RenderTargetDescriptor::new())
                    .with_depth(Attachment::new(depth)),
            );
        },
        |_| {},
    );
    let main = graph.add_render_pass(
        "main",
        |builder| {
            builder.add_render_target(
                RenderTargetConfig::new(
                    RenderTargetDescriptor::new()
                        .with_clear(AttachmentMask::DEPTH, ClearValue::default()),
                )
                .with_color(0, Attachment::new(color))
                .with_depth(Attachment::new(depth)),
            );
        },
        |_| {},
    );
    graph.present(color);

    graph.compile();

    let params = graph.render_target_params(main, 0);
    assert!(params.discard_start.contains(AttachmentMask::DEPTH));
    // The color attachment had no prior writer either.
    assert!(params.discard_start.contains(AttachmentMask::COLOR0));
}

// ============================================================================
// Size inference
// ============================================================================

/// Mismatched attachment sizes resolve to the union (max per axis), and
/// the allocator sees the grown size.
#[test]
fn test_viewport_grows_to_attachment_union() {
    init_logging();
    let log = event_log();
    let mut allocator = TrackingAllocator::new(Rc::clone(&log));

    let mut graph = FrameGraph::new();
    let wide = graph.create_texture("wide", color_descriptor(512, 256));
    let tall = graph.create_texture("tall", color_descriptor(256, 512));

    let pass = graph.add_render_pass(
        "mrt",
        |builder| {
            builder.add_render_target(
                RenderTargetConfig::new(RenderTargetDescriptor::new())
                    .with_color(0, Attachment::new(wide))
                    .with_color(1, Attachment::new(tall)),
            );
        },
        |_| {},
    );
    graph.present(wide);

    graph.compile();
    let params = graph.render_target_params(pass, 0);
    assert_eq!((params.viewport.width, params.viewport.height), (512, 512));

    graph.execute(&mut allocator, &mut ());
    assert!(log.borrow().contains(&Event::CreateTarget {
        pass: "mrt".to_string(),
        width: 512,
        height: 512,
    }));
}

// ============================================================================
// Imported targets
// ============================================================================

/// An imported first color attachment overrides descriptor, handle, and
/// discard-at-start wholesale, and the allocator is never involved.
#[test]
fn test_imported_swapchain_override() {
    init_logging();
    let log = event_log();
    let mut allocator = TrackingAllocator::new(Rc::clone(&log));

    let imported_descriptor = RenderTargetDescriptor::new()
        .with_viewport(Viewport::from_dimensions(1920, 1080))
        .with_clear(AttachmentMask::COLOR0, ClearValue::color(0.0, 0.0, 0.0, 1.0));

    let mut graph = FrameGraph::new();
    let swapchain = graph.import_render_target(
        "swapchain",
        imported_descriptor,
        RenderTargetHandle::from_raw(7),
        AttachmentMask::COLOR0,
    );

    let exec = Rc::clone(&log);
    let pass = graph.add_render_pass(
        "composite",
        |builder| {
            builder.add_render_target(
                // Local requests differ from the import in every field.
                RenderTargetConfig::new(
                    RenderTargetDescriptor::new()
                        .with_viewport(Viewport::from_dimensions(32, 32)),
                )
                .with_color(0, Attachment::new(swapchain)),
            );
        },
        move |ctx| {
            assert_eq!(
                ctx.render_target(0).handle,
                Some(RenderTargetHandle::from_raw(7))
            );
            record_execute(&exec, ctx.pass_name());
        },
    );
    graph.present(swapchain);

    graph.compile();

    let params = graph.render_target_params(pass, 0);
    assert_eq!(params.viewport, imported_descriptor.viewport);
    assert_eq!(params.clear_mask, AttachmentMask::COLOR0);
    assert_eq!(params.discard_start, AttachmentMask::COLOR0);
    assert_eq!(params.handle, Some(RenderTargetHandle::from_raw(7)));

    graph.execute(&mut allocator, &mut ());

    // The pass ran, but no graph-owned object was ever created.
    assert_eq!(*log.borrow(), vec![Event::Execute("composite".to_string())]);
    assert_eq!(allocator.live_objects(), 0);
}

// ============================================================================
// Lifetime boundedness
// ============================================================================

/// Every non-imported render target exists exactly for the execution of
/// its own pass: create, execute, destroy, with no other pass in between.
#[test]
fn test_render_target_lifetime_scoped_to_pass() {
    init_logging();
    let log = event_log();
    let mut allocator = TrackingAllocator::new(Rc::clone(&log));

    let mut graph = FrameGraph::new();
    let a = graph.create_texture("a", sampled_color_descriptor(64, 64));
    let b = graph.create_texture("b", sampled_color_descriptor(64, 64));
    let c = graph.create_texture("c", color_descriptor(64, 64));

    for (name, input, output) in [("p0", None, a), ("p1", Some(a), b), ("p2", Some(b), c)] {
        let exec = Rc::clone(&log);
        graph.add_render_pass(
            name,
            move |builder| {
                if let Some(input) = input {
                    builder.read(input);
                }
                builder.add_render_target(
                    RenderTargetConfig::new(RenderTargetDescriptor::new())
                        .with_color(0, Attachment::new(output)),
                );
            },
            move |ctx| record_execute(&exec, ctx.pass_name()),
        );
    }
    graph.present(c);

    graph.compile();
    graph.execute(&mut allocator, &mut ());

    let events = log.borrow();
    for name in ["p0", "p1", "p2"] {
        let create = events
            .iter()
            .position(|event| matches!(event, Event::CreateTarget { pass, .. } if pass == name))
            .unwrap();
        let execute = events
            .iter()
            .position(|event| *event == Event::Execute(name.to_string()))
            .unwrap();
        let destroy = events
            .iter()
            .position(|event| *event == Event::DestroyTarget(name.to_string()))
            .unwrap();

        assert_eq!(execute, create + 1, "pass {name} did not run right after its target was created");
        assert_eq!(destroy, execute + 1, "pass {name}'s target was not destroyed right after it ran");
    }

    // Everything was returned by the end of the frame.
    assert_eq!(allocator.live_objects(), 0);
}

/// Two records in one pass are both allocated before and released after
/// the single execute call.
#[test]
fn test_multiple_records_share_pass_lifetime() {
    init_logging();
    let log = event_log();
    let mut allocator = TrackingAllocator::new(Rc::clone(&log));

    let mut graph = FrameGraph::new();
    let first = graph.create_texture("first", color_descriptor(32, 32));
    let second = graph.create_texture("second", color_descriptor(64, 64));

    let exec = Rc::clone(&log);
    graph.add_render_pass(
        "split",
        |builder| {
            builder.add_render_target(
                RenderTargetConfig::new(RenderTargetDescriptor::new())
                    .with_color(0, Attachment::new(first)),
            );
            builder.add_render_target(
                RenderTargetConfig::new(RenderTargetDescriptor::new())
                    .with_color(0, Attachment::new(second)),
            );
        },
        move |ctx| {
            assert_eq!(ctx.render_target(0).viewport.width, 32);
            assert_eq!(ctx.render_target(1).viewport.width, 64);
            record_execute(&exec, ctx.pass_name());
        },
    );
    graph.present(first);

    graph.compile();
    graph.execute(&mut allocator, &mut ());

    let events = log.borrow();
    let executes: Vec<usize> = events
        .iter()
        .enumerate()
        .filter_map(|(index, event)| matches!(event, Event::Execute(_)).then_some(index))
        .collect();
    assert_eq!(executes.len(), 1);
    let execute = executes[0];

    let creates: Vec<usize> = events
        .iter()
        .enumerate()
        .filter_map(|(index, event)| {
            matches!(event, Event::CreateTarget { .. }).then_some(index)
        })
        .collect();
    let destroys: Vec<usize> = events
        .iter()
        .enumerate()
        .filter_map(|(index, event)| matches!(event, Event::DestroyTarget(_)).then_some(index))
        .collect();

    assert_eq!(creates.len(), 2);
    assert_eq!(destroys.len(), 2);
    assert!(creates.iter().all(|&index| index < execute));
    assert!(destroys.iter().all(|&index| index > execute));
}

// ============================================================================
// Frame reuse
// ============================================================================

/// With a pooling allocator, a second identical frame reuses every object
/// the first frame created.
#[test]
fn test_pool_allocator_reuses_across_frames() {
    init_logging();
    let mut allocator = PoolAllocator::new();
    let mut graph = FrameGraph::new();

    for frame in 0..2 {
        let color = graph.create_texture("color", color_descriptor(800, 600));
        graph.add_render_pass(
            "main",
            |builder| {
                builder.add_render_target(
                    RenderTargetConfig::new(RenderTargetDescriptor::new().with_clear(
                        AttachmentMask::COLOR0,
                        ClearValue::color(0.1, 0.1, 0.1, 1.0),
                    ))
                    .with_color(0, Attachment::new(color)),
                );
            },
            |_| {},
        );
        graph.present(color);

        graph.compile();
        graph.execute(&mut allocator, &mut ());

        if frame == 0 {
            assert_eq!(allocator.created(), 2); // one texture, one target
            assert_eq!(allocator.reused(), 0);
        } else {
            assert_eq!(allocator.created(), 2);
            assert_eq!(allocator.reused(), 2);
        }

        graph.reset();
        assert_eq!(graph.state(), FrameGraphState::Declaring);
    }
}

// ============================================================================
// Execute context
// ============================================================================

/// The context exposes resolved descriptors and physical handles for
/// declared resources, and panics for undeclared ones.
#[test]
fn test_execute_context_accessors() {
    init_logging();
    let log = event_log();
    let mut allocator = TrackingAllocator::new(Rc::clone(&log));

    let mut graph = FrameGraph::new();
    let auto = graph.create_texture(
        "auto",
        TextureDescriptor::new_2d(0, 0, TextureFormat::Rgba16Float, TextureUsage::RENDER_ATTACHMENT),
    );

    graph.add_render_pass(
        "main",
        |builder| {
            builder.add_render_target(
                RenderTargetConfig::new(
                    RenderTargetDescriptor::new()
                        .with_viewport(Viewport::from_dimensions(320, 240)),
                )
                .with_color(0, Attachment::new(auto)),
            );
        },
        move |ctx| {
            // The auto size was resolved from the explicit viewport.
            let descriptor = ctx.descriptor(auto);
            assert_eq!((descriptor.width, descriptor.height), (320, 240));
            // The backing texture exists while the pass runs.
            let _ = ctx.texture(auto);
        },
    );
    graph.present(auto);

    graph.compile();
    graph.execute(&mut allocator, &mut ());
    assert_eq!(allocator.live_objects(), 0);
}
