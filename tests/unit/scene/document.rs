use super::*;
use crate::foundation::core::Rect;
use kurbo::Shape;

fn rect_path() -> BezPath {
    Rect::new(0.0, 0.0, 4.0, 4.0).to_path(0.1)
}

#[test]
fn builder_links_children_in_order() {
    let mut b = DocumentBuilder::new(8, 8);
    let root = b.add(Node::group());
    let a = b.append(root, Node::shape(ShapeData::filled(rect_path(), Color::BLACK)));
    let g = b.append(root, Node::group());
    let c = b.append(g, Node::shape(ShapeData::new(rect_path())));
    let doc = b.build(root).unwrap();

    assert_eq!(doc.children(root).unwrap().collect::<Vec<_>>(), vec![a, g]);
    assert_eq!(doc.children(root).unwrap().rev().collect::<Vec<_>>(), vec![g, a]);
    assert_eq!(doc.node(c).unwrap().parent(), Some(g));
    assert!(doc.is_ancestor(root, c));
    assert!(doc.is_ancestor(c, c));
    assert!(!doc.is_ancestor(a, c));
}

#[test]
fn dangling_use_is_rejected() {
    let mut b = DocumentBuilder::new(8, 8);
    let root = b.add(Node::group());
    b.append(root, Node::new(NodeKind::Use { href: NodeId(42) }));
    let err = b.build(root).unwrap_err();
    assert!(matches!(err, StrataError::Validation(_)));
}

#[test]
fn mask_reference_must_point_at_a_mask() {
    let mut b = DocumentBuilder::new(8, 8);
    let root = b.add(Node::group());
    let not_mask = b.add(Node::group());
    b.append(root, Node::group().with_mask(not_mask));
    let err = b.build(root).unwrap_err();
    assert!(err.to_string().contains("mask reference"));
}

#[test]
fn opacity_out_of_range_is_rejected() {
    let mut b = DocumentBuilder::new(8, 8);
    let root = b.add(Node::group().with_opacity(1.5));
    assert!(b.build(root).is_err());

    let mut b = DocumentBuilder::new(8, 8);
    let root = b.add(Node::group().with_opacity(f32::NAN));
    assert!(b.build(root).is_err());
}

#[test]
fn zero_sized_canvas_is_rejected() {
    let mut b = DocumentBuilder::new(0, 8);
    let root = b.add(Node::group());
    assert!(b.build(root).is_err());
}

#[test]
fn image_buffer_length_is_checked() {
    assert!(ImageData::from_premul(2, 2, vec![0; 16], Rect::new(0.0, 0.0, 2.0, 2.0)).is_ok());
    assert!(ImageData::from_premul(2, 2, vec![0; 15], Rect::new(0.0, 0.0, 2.0, 2.0)).is_err());
}

#[test]
fn resource_kinds_are_flagged() {
    assert!(NodeKind::Mask(MaskData {
        mode: MaskMode::Alpha,
        region: None
    })
    .is_resource());
    assert!(!NodeKind::Group.is_resource());
}
