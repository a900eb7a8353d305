use std::sync::Arc;

use smallvec::SmallVec;

use crate::effects::composite::CompOp;
use crate::effects::filter::{Filter, FilterPrimitive};
use crate::effects::mask::MaskMode;
use crate::foundation::core::{Affine, BezPath, Color, Point, Rect};
use crate::foundation::error::{StrataError, StrataResult};
use crate::scene::NodeId;
use crate::scene::paint::{FillRule, Paint, StrokeStyle};

/// Resolved element of a document, as handed over by the styling collaborator.
///
/// All presentation attributes are already computed; the renderer never cascades or inherits
/// anything on its own.
#[derive(Clone, Debug)]
pub struct Node {
    /// Element payload.
    pub kind: NodeKind,
    /// Transform from this node's user space into its parent's user space.
    pub transform: Affine,
    /// Group opacity in `[0, 1]`.
    pub opacity: f32,
    /// Operator used to composite the element onto its backdrop.
    pub comp_op: CompOp,
    /// Clip path reference (a [`NodeKind::ClipPath`] node).
    pub clip_path: Option<NodeId>,
    /// Mask reference (a [`NodeKind::Mask`] node).
    pub mask: Option<NodeId>,
    /// Filter reference (a [`NodeKind::Filter`] node).
    pub filter: Option<NodeId>,
    /// `visibility`: when false the node draws nothing but its children still render.
    pub visible: bool,
    /// `display`: when false the whole subtree is skipped.
    pub display: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    /// Node with default presentation attributes.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            transform: Affine::IDENTITY,
            opacity: 1.0,
            comp_op: CompOp::SrcOver,
            clip_path: None,
            mask: None,
            filter: None,
            visible: true,
            display: true,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Plain container.
    pub fn group() -> Self {
        Self::new(NodeKind::Group)
    }

    /// Shape node.
    pub fn shape(shape: ShapeData) -> Self {
        Self::new(NodeKind::Shape(shape))
    }

    /// Set the node transform.
    pub fn with_transform(mut self, transform: Affine) -> Self {
        self.transform = transform;
        self
    }

    /// Set the group opacity.
    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    /// Set the compositing operator.
    pub fn with_comp_op(mut self, op: CompOp) -> Self {
        self.comp_op = op;
        self
    }

    /// Reference a clip path node.
    pub fn with_clip_path(mut self, clip: NodeId) -> Self {
        self.clip_path = Some(clip);
        self
    }

    /// Reference a mask node.
    pub fn with_mask(mut self, mask: NodeId) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Reference a filter node.
    pub fn with_filter(mut self, filter: NodeId) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set `visibility`.
    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Set `display`.
    pub fn with_display(mut self, display: bool) -> Self {
        self.display = display;
        self
    }

    /// Parent node, if any.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in document order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Element payloads.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// Container rendering its children in order.
    Group,
    /// Container rendering only its first displayed child.
    Switch,
    /// Instance of another node, rendered in this node's coordinate system.
    Use {
        /// Referenced node.
        href: NodeId,
    },
    /// Filled and/or stroked path.
    Shape(ShapeData),
    /// Pre-shaped text.
    Text(TextData),
    /// Raster image.
    Image(ImageData),
    /// Paint server tiling its children. Rendered only by reference.
    Pattern(PatternData),
    /// Mask content. Rendered only by reference.
    Mask(MaskData),
    /// Clip path content. Rendered only by reference.
    ClipPath(ClipPathData),
    /// Marker symbol placed on shape vertices. Rendered only by reference.
    Marker(MarkerData),
    /// Filter chain. Never drawn directly.
    Filter(Filter),
}

impl NodeKind {
    /// Return `true` for kinds that only render when referenced.
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            Self::Pattern(_) | Self::Mask(_) | Self::ClipPath(_) | Self::Marker(_) | Self::Filter(_)
        )
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Switch => "switch",
            Self::Use { .. } => "use",
            Self::Shape(_) => "shape",
            Self::Text(_) => "text",
            Self::Image(_) => "image",
            Self::Pattern(_) => "pattern",
            Self::Mask(_) => "mask",
            Self::ClipPath(_) => "clip path",
            Self::Marker(_) => "marker",
            Self::Filter(_) => "filter",
        }
    }
}

/// Marker references of a shape.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Markers {
    /// Marker drawn on the first vertex.
    pub start: Option<NodeId>,
    /// Marker drawn on every interior vertex.
    pub mid: Option<NodeId>,
    /// Marker drawn on the last vertex.
    pub end: Option<NodeId>,
}

impl Markers {
    fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.start.iter().chain(self.mid.iter()).chain(self.end.iter()).copied()
    }

    /// Return `true` when no marker is set.
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.mid.is_none() && self.end.is_none()
    }
}

/// Path geometry with resolved fill and stroke.
#[derive(Clone, Debug)]
pub struct ShapeData {
    /// Geometry in user space.
    pub path: BezPath,
    /// Fill paint.
    pub fill: Paint,
    /// Fill rule.
    pub fill_rule: FillRule,
    /// Fill opacity in `[0, 1]`.
    pub fill_opacity: f32,
    /// Stroke, if any.
    pub stroke: Option<StrokeStyle>,
    /// Vertex markers.
    pub markers: Markers,
}

impl ShapeData {
    /// Unpainted shape.
    pub fn new(path: BezPath) -> Self {
        Self {
            path,
            fill: Paint::None,
            fill_rule: FillRule::NonZero,
            fill_opacity: 1.0,
            stroke: None,
            markers: Markers::default(),
        }
    }

    /// Shape filled with a solid color.
    pub fn filled(path: BezPath, color: Color) -> Self {
        Self::new(path).with_fill(Paint::Color(color))
    }

    /// Set the fill paint.
    pub fn with_fill(mut self, fill: Paint) -> Self {
        self.fill = fill;
        self
    }

    /// Set the fill rule.
    pub fn with_fill_rule(mut self, rule: FillRule) -> Self {
        self.fill_rule = rule;
        self
    }

    /// Set the stroke.
    pub fn with_stroke(mut self, stroke: StrokeStyle) -> Self {
        self.stroke = Some(stroke);
        self
    }

    /// Set the markers.
    pub fn with_markers(mut self, markers: Markers) -> Self {
        self.markers = markers;
        self
    }
}

/// One positioned glyph.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Glyph {
    /// Glyph id in the font.
    pub id: u32,
    /// X position in user space.
    pub x: f32,
    /// Y position (baseline) in user space.
    pub y: f32,
}

/// Shaped run of glyphs sharing one font and color.
#[derive(Clone, Debug)]
pub struct GlyphRun {
    /// Raw font file bytes.
    pub font: Arc<Vec<u8>>,
    /// Face index in a collection.
    pub font_index: u32,
    /// Font size in user units.
    pub font_size: f32,
    /// Fill color.
    pub color: Color,
    /// Positioned glyphs.
    pub glyphs: Vec<Glyph>,
}

/// Pre-shaped text.
#[derive(Clone, Debug, Default)]
pub struct TextData {
    /// Glyph runs in paint order.
    pub runs: Vec<GlyphRun>,
}

/// Decoded raster image.
#[derive(Clone, Debug)]
pub struct ImageData {
    /// Source width in pixels.
    pub width: u32,
    /// Source height in pixels.
    pub height: u32,
    /// Premultiplied RGBA8 pixels, tightly packed.
    pub pixels: Arc<Vec<u8>>,
    /// Destination rectangle in user space.
    pub dest: Rect,
}

impl ImageData {
    /// Wrap premultiplied pixels, checking the buffer length.
    pub fn from_premul(width: u32, height: u32, pixels: Vec<u8>, dest: Rect) -> StrataResult<Self> {
        let expected = (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(4);
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(StrataError::validation(format!(
                "image pixel buffer is {} bytes, expected {expected} for {width}x{height}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels: Arc::new(pixels),
            dest,
        })
    }
}

/// Pattern tile geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternData {
    /// Tile rectangle in the user space of the painted element.
    pub tile: Rect,
    /// Transform applied to the pattern children, relative to the tile origin.
    pub content_transform: Affine,
}

/// Mask parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskData {
    /// Whether luminance or alpha of the mask content is used.
    pub mode: MaskMode,
    /// Mask region in the user space of the masked element; content outside is dropped.
    pub region: Option<Rect>,
}

/// Clip path parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClipPathData {
    /// `clip-rule` applied to each child shape.
    pub rule: FillRule,
}

/// Marker orientation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MarkerOrient {
    /// Follow the path direction at the vertex.
    Auto,
    /// Fixed angle in degrees.
    Angle(f64),
}

/// Marker viewport and placement.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerData {
    /// Point of the marker content aligned with the vertex.
    pub ref_point: Point,
    /// Viewport width in marker units.
    pub width: f64,
    /// Viewport height in marker units.
    pub height: f64,
    /// Orientation.
    pub orient: MarkerOrient,
    /// `markerUnits="strokeWidth"`.
    pub scale_by_stroke_width: bool,
}

impl Default for MarkerData {
    fn default() -> Self {
        Self {
            ref_point: Point::ZERO,
            width: 3.0,
            height: 3.0,
            orient: MarkerOrient::Angle(0.0),
            scale_by_stroke_width: true,
        }
    }
}

/// Immutable, validated node arena.
#[derive(Clone, Debug)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    width: u32,
    height: u32,
}

impl Document {
    /// Root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Canvas width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Canvas height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Return `true` when the arena holds no node.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> StrataResult<&Node> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| StrataError::validation(format!("dangling node reference {id}")))
    }

    /// Children of `id` in document order; call `.rev()` for reverse order.
    pub fn children(
        &self,
        id: NodeId,
    ) -> StrataResult<impl DoubleEndedIterator<Item = NodeId> + '_> {
        Ok(self.node(id)?.children.iter().copied())
    }

    /// Return `true` if `ancestor` is `descendant` or one of its ancestors.
    pub fn is_ancestor(&self, ancestor: NodeId, descendant: NodeId) -> bool {
        let mut cur = Some(descendant);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.nodes.get(id.index()).and_then(|n| n.parent);
        }
        false
    }

    /// Check references, opacities and canvas size.
    pub fn validate(&self) -> StrataResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(StrataError::validation(format!(
                "document size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        self.node(self.root)?;

        for (i, node) in self.nodes.iter().enumerate() {
            let id = NodeId(i as u32);
            if !node.opacity.is_finite() || !(0.0..=1.0).contains(&node.opacity) {
                return Err(StrataError::validation(format!(
                    "node {id}: opacity {} outside [0, 1]",
                    node.opacity
                )));
            }
            for &child in &node.children {
                self.node(child)?;
            }
            self.expect_kind(id, node.clip_path, "clip path", |k| {
                matches!(k, NodeKind::ClipPath(_))
            })?;
            self.expect_kind(id, node.mask, "mask", |k| matches!(k, NodeKind::Mask(_)))?;
            self.expect_kind(id, node.filter, "filter", |k| matches!(k, NodeKind::Filter(_)))?;

            match &node.kind {
                NodeKind::Use { href } => {
                    self.node(*href)?;
                }
                NodeKind::Shape(shape) => {
                    let mut paints: SmallVec<[&Paint; 2]> = SmallVec::new();
                    paints.push(&shape.fill);
                    if let Some(stroke) = &shape.stroke {
                        paints.push(&stroke.paint);
                    }
                    for paint in paints {
                        self.expect_kind(id, paint.referenced_node(), "pattern", |k| {
                            matches!(k, NodeKind::Pattern(_))
                        })?;
                    }
                    for marker in shape.markers.iter() {
                        self.expect_kind(id, Some(marker), "marker", |k| {
                            matches!(k, NodeKind::Marker(_))
                        })?;
                    }
                }
                NodeKind::Image(image) => {
                    let expected = (image.width as usize)
                        .saturating_mul(image.height as usize)
                        .saturating_mul(4);
                    if image.pixels.len() != expected {
                        return Err(StrataError::validation(format!(
                            "node {id}: image buffer length mismatch"
                        )));
                    }
                }
                NodeKind::Filter(filter) => {
                    for prim in &filter.primitives {
                        if let FilterPrimitive::Image { node: input } = prim {
                            self.node(*input)?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn expect_kind(
        &self,
        owner: NodeId,
        target: Option<NodeId>,
        what: &str,
        pred: impl Fn(&NodeKind) -> bool,
    ) -> StrataResult<()> {
        let Some(target) = target else {
            return Ok(());
        };
        let node = self.node(target)?;
        if pred(&node.kind) {
            Ok(())
        } else {
            Err(StrataError::validation(format!(
                "node {owner}: {what} reference {target} points at a {}",
                node.kind.name()
            )))
        }
    }
}

/// Incremental [`Document`] constructor.
///
/// Parents must be appended before their children, so the parent links always form a tree.
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    nodes: Vec<Node>,
    width: u32,
    height: u32,
}

impl DocumentBuilder {
    /// Empty builder for a `width x height` canvas.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            nodes: Vec::new(),
            width,
            height,
        }
    }

    /// Append a node without a parent (typically the root or a detached resource).
    pub fn add(&mut self, node: Node) -> NodeId {
        self.push(None, node)
    }

    /// Append `node` as the last child of `parent`.
    pub fn append(&mut self, parent: NodeId, node: Node) -> NodeId {
        self.push(Some(parent), node)
    }

    /// Mutable access to a node appended earlier.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    fn push(&mut self, parent: Option<NodeId>, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        node.parent = parent;
        node.children.clear();
        self.nodes.push(node);
        id
    }

    /// Link children to parents and validate the result.
    pub fn build(self, root: NodeId) -> StrataResult<Document> {
        let mut nodes = self.nodes;
        for i in 0..nodes.len() {
            let Some(parent) = nodes[i].parent else {
                continue;
            };
            if parent.index() >= i {
                return Err(StrataError::validation(format!(
                    "node #{i}: parent {parent} must be appended before its children"
                )));
            }
            nodes[parent.index()].children.push(NodeId(i as u32));
        }

        let doc = Document {
            nodes,
            root,
            width: self.width,
            height: self.height,
        };
        doc.validate()?;
        Ok(doc)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/scene/document.rs"]
mod tests;
