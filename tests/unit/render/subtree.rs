use super::*;
use crate::foundation::core::{Color, Rect};
use crate::render::cpu::{CpuBackend, CpuBackendOpts};
use crate::render::layer::GroupParams;
use crate::render::session::RenderOpts;
use crate::scene::document::{Document, DocumentBuilder, Node, NodeKind, PatternData, ShapeData};
use crate::scene::paint::{FillRule, Paint};
use kurbo::Shape;

fn square(x0: f64, y0: f64, x1: f64, y1: f64, color: Color) -> Node {
    Node::shape(ShapeData::filled(Rect::new(x0, y0, x1, y1).to_path(0.1), color))
}

/// Root group with an empty group (#1) and a red 4x4 square (#2).
fn doc() -> Document {
    let mut b = DocumentBuilder::new(16, 16);
    let root = b.add(Node::group());
    b.append(root, Node::group());
    b.append(root, square(0.0, 0.0, 4.0, 4.0, Color::rgb(255, 0, 0)));
    b.build(root).unwrap()
}

fn bound<'a>(doc: &'a Document, backend: &'a mut CpuBackend) -> DrawingCtx<'a, CpuBackend> {
    let root = backend.create_surface(16, 16).unwrap();
    let mut dc = DrawingCtx::new(doc, backend, &RenderOpts::default());
    dc.bind_root(root).unwrap();
    dc
}

fn pixels(dc: &DrawingCtx<'_, CpuBackend>, res: &NodeRenderResult) -> Vec<u8> {
    dc.backend().read_pixels(res.surface).unwrap()
}

#[test]
fn empty_node_renders_a_transparent_surface() {
    let doc = doc();
    let mut backend = CpuBackend::default();
    let mut dc = bound(&doc, &mut backend);

    let res = dc.get_surface_of_node(NodeId(1), 10, 10).unwrap();
    assert_eq!((res.width, res.height), (10, 10));
    assert_eq!(res.origin, (0, 0));
    assert_eq!(res.ink, None);
    assert_eq!(dc.backend().surface_size(res.surface).unwrap(), (10, 10));
    assert!(pixels(&dc, &res).iter().all(|&v| v == 0));
    dc.release(res);
    assert_eq!(dc.backend().live_surfaces(), 1);
}

#[test]
fn non_positive_dimensions_fail_before_allocating() {
    let doc = doc();
    let mut backend = CpuBackend::default();
    let mut dc = bound(&doc, &mut backend);
    let before = dc.backend().live_surfaces();

    assert!(matches!(
        dc.get_surface_of_node(NodeId(1), 0, 5),
        Err(StrataError::InvalidDimensions { width: 0, height: 5 })
    ));
    assert!(matches!(
        dc.get_surface_of_node(NodeId(1), 5, -1),
        Err(StrataError::InvalidDimensions { .. })
    ));
    assert_eq!(dc.backend().live_surfaces(), before);
    assert!(dc.resolution_set().is_empty());
}

#[test]
fn subtree_ignores_the_ambient_transform_and_clip() {
    let doc = doc();
    let mut backend = CpuBackend::default();
    let mut dc = bound(&doc, &mut backend);
    dc.context_mut()
        .concat_transform(Affine::translate((8.0, 8.0)))
        .unwrap();
    dc.context_mut()
        .push_clip(&Rect::new(8.0, 8.0, 9.0, 9.0).to_path(0.1), FillRule::NonZero)
        .unwrap();

    let res = dc.get_surface_of_node(NodeId(2), 8, 8).unwrap();
    let data = pixels(&dc, &res);
    assert_eq!(&data[0..4], &[255, 0, 0, 255]);
    let outside = ((5 * 8 + 5) * 4) as usize;
    assert_eq!(&data[outside..outside + 4], &[0, 0, 0, 0]);
    dc.release(res);

    assert_eq!(dc.context().depth(), 1);
    assert_eq!(
        dc.context().transform().unwrap(),
        Affine::translate((8.0, 8.0))
    );
    assert_eq!(dc.context().clip_paths().unwrap().len(), 1);
    assert_eq!(dc.ink_bounds(), None);
}

#[test]
fn subtree_ignores_ambient_group_opacity() {
    let doc = doc();
    let mut backend = CpuBackend::default();
    let mut dc = bound(&doc, &mut backend);
    dc.push_discrete_layer(false, &GroupParams::with_opacity(0.25))
        .unwrap();

    let res = dc.get_surface_of_node(NodeId(2), 4, 4).unwrap();
    assert_eq!(&pixels(&dc, &res)[0..4], &[255, 0, 0, 255]);
    dc.release(res);
    dc.pop_discrete_layer(false).unwrap();
}

#[test]
fn base_transform_places_the_content() {
    let doc = doc();
    let mut backend = CpuBackend::default();
    let mut dc = bound(&doc, &mut backend);

    let base = Affine::translate((4.0, 4.0));
    let res = dc
        .get_surface_of_node_with_transform(NodeId(2), 8, 8, base, (3, 7))
        .unwrap();
    assert_eq!(res.origin, (3, 7));
    assert_eq!(
        res.ink,
        Some(crate::foundation::core::PixelRect {
            x: 4,
            y: 4,
            width: 4,
            height: 4,
        })
    );
    let data = pixels(&dc, &res);
    assert_eq!(&data[0..4], &[0, 0, 0, 0]);
    let inside = ((5 * 8 + 5) * 4) as usize;
    assert_eq!(&data[inside..inside + 4], &[255, 0, 0, 255]);
    dc.release(res);
}

#[test]
fn node_already_being_resolved_is_a_cycle() {
    let doc = doc();
    let mut backend = CpuBackend::default();
    let mut dc = bound(&doc, &mut backend);
    assert!(dc.resolving.enter(NodeId(2)));

    let err = dc.get_surface_of_node(NodeId(2), 4, 4).unwrap_err();
    assert!(matches!(err, StrataError::CyclicReference(NodeId(2))));
    assert!(err.is_recoverable());
    assert!(dc.resolution_set().contains(NodeId(2)));
    assert_eq!(dc.backend().live_surfaces(), 1);
}

#[test]
fn resolution_set_is_empty_after_a_render() {
    let doc = doc();
    let mut backend = CpuBackend::default();
    let mut dc = bound(&doc, &mut backend);
    let res = dc.get_surface_of_node(NodeId(0), 16, 16).unwrap();
    assert!(dc.resolution_set().is_empty());
    assert_eq!(dc.stats().subtree_renders, 1);
    dc.release(res);
}

#[test]
fn dangling_node_is_a_validation_error() {
    let doc = doc();
    let mut backend = CpuBackend::default();
    let mut dc = bound(&doc, &mut backend);
    assert!(matches!(
        dc.get_surface_of_node(NodeId(99), 4, 4),
        Err(StrataError::Validation(_))
    ));
}

#[test]
fn failed_allocation_keeps_the_ambient_stack() {
    let doc = doc();
    let mut backend = CpuBackend::new(CpuBackendOpts::default().with_max_live_surfaces(Some(1)));
    let mut dc = bound(&doc, &mut backend);
    dc.push_discrete_layer(true, &GroupParams::default()).unwrap();

    assert!(matches!(
        dc.get_surface_of_node(NodeId(2), 4, 4),
        Err(StrataError::AllocationFailure(_))
    ));
    assert_eq!(dc.context().depth(), 2);
    assert!(dc.resolution_set().is_empty());
    dc.pop_discrete_layer(true).unwrap();
}

#[test]
fn self_referencing_pattern_tile_reports_a_cycle() {
    let mut b = DocumentBuilder::new(8, 8);
    let root = b.add(Node::group());
    let pattern = b.add(Node::new(NodeKind::Pattern(PatternData {
        tile: Rect::new(0.0, 0.0, 4.0, 4.0),
        content_transform: Affine::IDENTITY,
    })));
    b.append(
        pattern,
        Node::shape(
            ShapeData::new(Rect::new(0.0, 0.0, 4.0, 4.0).to_path(0.1))
                .with_fill(Paint::Pattern(pattern)),
        ),
    );
    let doc = b.build(root).unwrap();

    let mut backend = CpuBackend::default();
    let opts = RenderOpts {
        recover_reference_errors: false,
        ..RenderOpts::default()
    };
    let root_surface = backend.create_surface(8, 8).unwrap();
    let mut dc = DrawingCtx::new(&doc, &mut backend, &opts);
    dc.bind_root(root_surface).unwrap();

    let err = dc.get_surface_of_node(pattern, 4, 4).unwrap_err();
    assert!(matches!(err, StrataError::CyclicReference(id) if id == pattern));
    assert!(dc.resolution_set().is_empty());
    assert_eq!(dc.context().depth(), 1);
    assert_eq!(dc.backend().live_surfaces(), 1);
}
