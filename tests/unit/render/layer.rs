use super::*;
use crate::foundation::core::{Color, Rect};
use crate::render::backend::BackendPaint;
use crate::render::cpu::{CpuBackend, CpuBackendOpts};
use crate::render::session::RenderOpts;
use crate::scene::document::{Document, DocumentBuilder, Node};
use crate::scene::paint::FillRule;
use kurbo::Shape;

const WHITE: Rgba8Premul = Rgba8Premul {
    r: 255,
    g: 255,
    b: 255,
    a: 255,
};

fn empty_doc() -> Document {
    let mut b = DocumentBuilder::new(8, 8);
    let root = b.add(Node::group());
    b.build(root).unwrap()
}

fn root_surface(backend: &mut CpuBackend, fill: Option<Rgba8Premul>) -> SurfaceId {
    let s = backend.create_surface(8, 8).unwrap();
    if let Some(c) = fill {
        backend.apply_filter(s, &PixelPass::Flood(c)).unwrap();
    }
    s
}

fn fill_all(dc: &mut DrawingCtx<'_, CpuBackend>, color: Color) {
    let h = dc.sync_target().unwrap();
    let path = Rect::new(0.0, 0.0, 8.0, 8.0).to_path(0.1);
    dc.backend
        .fill_path(h, &path, FillRule::NonZero, &BackendPaint::Solid(color))
        .unwrap();
}

fn px(backend: &CpuBackend, s: SurfaceId, x: u32, y: u32) -> [u8; 4] {
    let data = backend.read_pixels(s).unwrap();
    let i = ((y * 8 + x) as usize) * 4;
    [data[i], data[i + 1], data[i + 2], data[i + 3]]
}

#[test]
fn balanced_pushes_restore_depth_after_every_pop() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, None);
    let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
    dc.bind_root(root).unwrap();

    dc.push_discrete_layer(true, &GroupParams::default()).unwrap();
    dc.push_discrete_layer(false, &GroupParams::with_opacity(0.5)).unwrap();
    dc.push_discrete_layer(true, &GroupParams::default()).unwrap();
    assert_eq!(dc.context().depth(), 4);
    dc.pop_discrete_layer(true).unwrap();
    assert_eq!(dc.context().depth(), 3);
    dc.pop_discrete_layer(false).unwrap();
    assert_eq!(dc.context().depth(), 2);
    dc.pop_discrete_layer(true).unwrap();
    assert_eq!(dc.context().depth(), 1);
    assert_eq!(dc.backend().live_surfaces(), 1);
}

#[test]
fn clip_layer_shares_the_parent_target() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, None);
    let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
    dc.bind_root(root).unwrap();

    dc.push_discrete_layer(true, &GroupParams::default()).unwrap();
    assert_eq!(dc.context().current_target().unwrap().surface(), root);
    assert_eq!(dc.context().top().unwrap().kind(), LayerKind::Clip);
    assert_eq!(dc.backend().live_surfaces(), 1);
    dc.pop_discrete_layer(true).unwrap();
}

#[test]
fn clip_narrowing_is_dropped_on_pop() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, None);
    let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
    dc.bind_root(root).unwrap();

    dc.push_discrete_layer(true, &GroupParams::default()).unwrap();
    dc.context_mut()
        .push_clip(&Rect::new(0.0, 0.0, 2.0, 2.0).to_path(0.1), FillRule::NonZero)
        .unwrap();
    assert_eq!(dc.context().clip_bounds().unwrap().width, 2);
    dc.pop_discrete_layer(true).unwrap();
    assert_eq!(dc.context().clip_bounds().unwrap(), PixelRect::from_size(8, 8));
}

#[test]
fn half_opacity_group_blends_red_over_white() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, Some(WHITE));
    {
        let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
        dc.bind_root(root).unwrap();
        dc.push_discrete_layer(false, &GroupParams::with_opacity(0.5)).unwrap();
        fill_all(&mut dc, Color::rgb(255, 0, 0));
        dc.pop_discrete_layer(false).unwrap();
        assert_eq!(dc.stats().groups_composited, 1);
    }
    assert_eq!(px(&backend, root, 3, 3), [255, 128, 128, 255]);
    assert_eq!(backend.live_surfaces(), 1);
}

#[test]
fn nested_half_opacities_multiply() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, Some(WHITE));
    {
        let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
        dc.bind_root(root).unwrap();
        dc.push_discrete_layer(false, &GroupParams::with_opacity(0.5)).unwrap();
        dc.push_discrete_layer(false, &GroupParams::with_opacity(0.5)).unwrap();
        assert!((dc.context().top().unwrap().opacity() - 0.25).abs() < 1e-6);
        fill_all(&mut dc, Color::rgb(255, 0, 0));
        dc.pop_discrete_layer(false).unwrap();
        dc.pop_discrete_layer(false).unwrap();
    }
    let [r, g, b, a] = px(&backend, root, 0, 0);
    assert_eq!((r, a), (255, 255));
    assert!((190..=192).contains(&g), "g = {g}");
    assert_eq!(g, b);
}

#[test]
fn mismatched_pop_is_rejected() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, None);
    let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
    dc.bind_root(root).unwrap();

    assert!(matches!(
        dc.pop_discrete_layer(true),
        Err(StrataError::MismatchedLayerPairing(_))
    ));
    dc.push_discrete_layer(true, &GroupParams::default()).unwrap();
    assert!(matches!(
        dc.pop_discrete_layer(false),
        Err(StrataError::MismatchedLayerPairing(_))
    ));
    assert_eq!(dc.context().depth(), 2);
}

#[test]
fn group_over_an_empty_clip_fails_without_a_frame() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, None);
    let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
    dc.bind_root(root).unwrap();
    dc.context_mut()
        .push_clip(&Rect::new(20.0, 20.0, 30.0, 30.0).to_path(0.1), FillRule::NonZero)
        .unwrap();

    let err = dc.push_discrete_layer(false, &GroupParams::default()).unwrap_err();
    assert!(matches!(err, StrataError::AllocationFailure(_)));
    assert_eq!(dc.context().depth(), 1);
    assert_eq!(dc.backend().live_surfaces(), 1);
}

#[test]
fn allocation_failure_deep_in_the_stack_releases_everything_on_unwind() {
    let doc = empty_doc();
    let mut backend = CpuBackend::new(CpuBackendOpts::default().with_max_live_surfaces(Some(3)));
    let root = root_surface(&mut backend, None);
    {
        let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
        dc.bind_root(root).unwrap();
        dc.push_discrete_layer(false, &GroupParams::with_opacity(0.5)).unwrap();
        dc.push_discrete_layer(false, &GroupParams::with_opacity(0.5)).unwrap();
        let err = dc.push_discrete_layer(false, &GroupParams::with_opacity(0.5)).unwrap_err();
        assert!(matches!(err, StrataError::AllocationFailure(_)));
        assert_eq!(dc.context().depth(), 3);
        dc.unwind_to(1);
        assert_eq!(dc.context().depth(), 1);
    }
    assert_eq!(backend.live_surfaces(), 1);
}

#[test]
fn depth_guard_counts_group_layers_only() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, None);
    let opts = RenderOpts {
        max_layer_depth: 2,
        ..RenderOpts::default()
    };
    let mut dc = DrawingCtx::new(&doc, &mut backend, &opts);
    dc.bind_root(root).unwrap();
    for _ in 0..5 {
        dc.push_discrete_layer(true, &GroupParams::default()).unwrap();
    }
    dc.push_discrete_layer(false, &GroupParams::with_opacity(0.5)).unwrap();
    dc.push_discrete_layer(false, &GroupParams::with_opacity(0.5)).unwrap();
    assert_eq!(dc.context().group_depth(), 2);
    assert!(matches!(
        dc.push_discrete_layer(false, &GroupParams::with_opacity(0.5)),
        Err(StrataError::Validation(_))
    ));
    dc.push_discrete_layer(true, &GroupParams::default()).unwrap();
    assert_eq!(dc.context().depth(), 9);
    dc.unwind_to(1);
    assert_eq!(dc.backend().live_surfaces(), 1);
}

#[test]
fn popped_layers_pass_their_extents_to_the_parent() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, None);
    let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
    dc.bind_root(root).unwrap();

    dc.with_discrete_layer(true, &GroupParams::default(), |dc| {
        dc.context_mut()
            .push_clip(&Rect::new(0.0, 0.0, 4.0, 4.0).to_path(0.1), FillRule::NonZero)?;
        dc.with_discrete_layer(false, &GroupParams::with_opacity(0.5), |dc| {
            dc.context_mut().insert_bbox(Rect::new(1.0, 1.0, 6.0, 6.0))
        })
    })
    .unwrap();
    assert_eq!(
        dc.ink_bounds(),
        Some(PixelRect {
            x: 1,
            y: 1,
            width: 3,
            height: 3,
        })
    );
}

#[test]
fn discarded_layers_leave_no_extents() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, None);
    let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
    dc.bind_root(root).unwrap();
    {
        let mut guard = dc.discrete_layer(false, &GroupParams::default()).unwrap();
        guard
            .context_mut()
            .insert_bbox(Rect::new(0.0, 0.0, 8.0, 8.0))
            .unwrap();
    }
    assert_eq!(dc.ink_bounds(), None);
}

#[test]
fn filtered_group_claims_its_whole_surface() {
    let frame = Frame {
        kind: LayerKind::Group,
        target: crate::render::backend::DrawingHandle::new(SurfaceId(3)),
        owned_surface: Some(SurfaceId(3)),
        bounds: PixelRect::from_size(8, 8),
        transform: Affine::IDENTITY,
        clips: Vec::new(),
        opacity: 1.0,
        comp_op: CompOp::SrcOver,
        group: Some(GroupParams {
            filter: Some(NodeId(0)),
            ..GroupParams::default()
        }),
        push_transform: Affine::IDENTITY,
        ink: Some(Rect::new(2.0, 2.0, 3.0, 3.0)),
    };
    assert_eq!(group_ink(&frame), Some(Rect::new(0.0, 0.0, 8.0, 8.0)));

    let plain = Frame {
        group: Some(GroupParams::default()),
        ..frame
    };
    assert_eq!(group_ink(&plain), Some(Rect::new(2.0, 2.0, 3.0, 3.0)));
}

#[test]
fn dropped_guard_discards_the_group() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, Some(WHITE));
    {
        let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
        dc.bind_root(root).unwrap();
        {
            let mut guard = dc.discrete_layer(false, &GroupParams::default()).unwrap();
            assert_eq!(guard.base_depth(), 1);
            fill_all(&mut guard, Color::rgb(0, 0, 255));
            assert_eq!(guard.backend().live_surfaces(), 2);
        }
        assert_eq!(dc.context().depth(), 1);
        assert_eq!(dc.stats().groups_composited, 0);
    }
    assert_eq!(px(&backend, root, 4, 4), [255, 255, 255, 255]);
    assert_eq!(backend.live_surfaces(), 1);
}

#[test]
fn finished_guard_composites_the_group() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, None);
    {
        let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
        dc.bind_root(root).unwrap();
        let mut guard = dc.discrete_layer(false, &GroupParams::default()).unwrap();
        fill_all(&mut guard, Color::rgb(0, 0, 255));
        guard.finish().unwrap();
    }
    assert_eq!(px(&backend, root, 4, 4), [0, 0, 255, 255]);
}

#[test]
fn guard_finished_over_open_inner_layers_unwinds_them() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, None);
    let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
    dc.bind_root(root).unwrap();

    let mut guard = dc.discrete_layer(false, &GroupParams::default()).unwrap();
    guard.push_discrete_layer(false, &GroupParams::default()).unwrap();
    assert!(matches!(
        guard.finish(),
        Err(StrataError::MismatchedLayerPairing(_))
    ));
    assert_eq!(dc.context().depth(), 1);
    assert_eq!(dc.backend().live_surfaces(), 1);
}

#[test]
fn with_discrete_layer_discards_on_error() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, None);
    {
        let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
        dc.bind_root(root).unwrap();
        let res: StrataResult<()> = dc.with_discrete_layer(false, &GroupParams::default(), |dc| {
            fill_all(dc, Color::rgb(0, 255, 0));
            Err(StrataError::backend("boom"))
        });
        assert!(matches!(res, Err(StrataError::BackendCompositeFailure(_))));
        assert_eq!(dc.context().depth(), 1);
    }
    assert_eq!(px(&backend, root, 0, 0), [0, 0, 0, 0]);
    assert_eq!(backend.live_surfaces(), 1);
}

#[test]
fn group_surface_is_sized_to_the_clip() {
    let doc = empty_doc();
    let mut backend = CpuBackend::default();
    let root = root_surface(&mut backend, None);
    let mut dc = DrawingCtx::new(&doc, &mut backend, &RenderOpts::default());
    dc.bind_root(root).unwrap();
    dc.context_mut()
        .push_clip(&Rect::new(2.0, 3.0, 6.0, 5.0).to_path(0.1), FillRule::NonZero)
        .unwrap();
    dc.push_discrete_layer(false, &GroupParams::default()).unwrap();

    let top = dc.context().top().unwrap();
    let surface = top.owned_surface().unwrap();
    assert_eq!(
        top.bounds(),
        PixelRect {
            x: 2,
            y: 3,
            width: 4,
            height: 2
        }
    );
    assert_eq!(dc.backend().surface_size(surface).unwrap(), (4, 2));
    dc.pop_discrete_layer(false).unwrap();
}

#[test]
fn isolation_is_only_needed_for_non_trivial_groups() {
    assert!(!GroupParams::default().needs_isolation());
    assert!(GroupParams::with_opacity(0.9).needs_isolation());
    assert!(
        GroupParams {
            comp_op: CompOp::Multiply,
            ..GroupParams::default()
        }
        .needs_isolation()
    );
    assert!(
        GroupParams {
            mask: Some(NodeId(3)),
            ..GroupParams::default()
        }
        .needs_isolation()
    );
}
