use kurbo::{Shape, StrokeOpts};

use crate::effects::composite::CompOp;
use crate::foundation::core::{Affine, BezPath, Color, PixelRect, Point, Rect, Vec2};
use crate::foundation::error::{StrataError, StrataResult};
use crate::render::backend::{BackendPaint, DrawingBackend};
use crate::render::drawing_ctx::{DrawingCtx, RenderMode};
use crate::render::layer::GroupParams;
use crate::scene::NodeId;
use crate::scene::document::{
    GlyphRun, ImageData, MarkerData, MarkerOrient, Node, NodeKind, ShapeData, TextData,
};
use crate::scene::paint::{FillRule, Paint};

/// How an element's clip path is realized.
enum ClipPlan {
    /// Clip path without displayed content: the element is invisible.
    Empty,
    /// Single path, in the element's user space.
    Path(BezPath, FillRule),
    /// Anything else: clip content rendered as an alpha mask.
    Mask,
}

/// Shape vertex with its incoming and outgoing directions, used for marker placement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Vertex {
    pub(crate) point: Point,
    pub(crate) incoming: Option<Vec2>,
    pub(crate) outgoing: Option<Vec2>,
}

impl Vertex {
    /// Marker angle in radians: bisector of both directions when the vertex has two.
    pub(crate) fn angle(&self) -> f64 {
        match (self.incoming, self.outgoing) {
            (Some(i), Some(o)) => {
                let a1 = i.atan2();
                let mut delta = o.atan2() - a1;
                while delta > std::f64::consts::PI {
                    delta -= std::f64::consts::TAU;
                }
                while delta <= -std::f64::consts::PI {
                    delta += std::f64::consts::TAU;
                }
                a1 + delta / 2.0
            }
            (Some(d), None) | (None, Some(d)) => d.atan2(),
            (None, None) => 0.0,
        }
    }
}

impl<'a, B: DrawingBackend + ?Sized> DrawingCtx<'a, B> {
    /// Render `id` as part of the tree walk.
    ///
    /// Resource kinds draw nothing here; `display = false` skips the whole subtree.
    pub fn render_node(&mut self, id: NodeId) -> StrataResult<()> {
        let doc = self.document;
        let node = doc.node(id)?;
        if !node.display || node.kind.is_resource() {
            return Ok(());
        }
        self.render_element(id, node)
    }

    /// Render a node reached through a reference (pattern tile, mask, marker, clip path, filter
    /// input, use).
    pub(crate) fn render_referenced(&mut self, id: NodeId) -> StrataResult<()> {
        let doc = self.document;
        let node = doc.node(id)?;
        match &node.kind {
            NodeKind::Pattern(pattern) => self.render_in_viewport(
                id,
                pattern.tile.width(),
                pattern.tile.height(),
                pattern.content_transform,
            ),
            NodeKind::Mask(mask) => match mask.region {
                Some(region) => self.with_discrete_layer(true, &GroupParams::default(), |this| {
                    this.ctx.push_clip(&region.to_path(0.1), FillRule::NonZero)?;
                    this.render_children(id)
                }),
                None => self.render_children(id),
            },
            NodeKind::Marker(marker) => {
                self.render_in_viewport(id, marker.width, marker.height, Affine::IDENTITY)
            }
            NodeKind::ClipPath(_) => {
                self.ctx.concat_transform(node.transform)?;
                self.render_children(id)
            }
            NodeKind::Filter(_) => Ok(()),
            _ => self.render_node(id),
        }
    }

    /// Children of `id` inside a nested `width x height` viewport anchored at the current origin,
    /// clipped to it.
    fn render_in_viewport(
        &mut self,
        id: NodeId,
        width: f64,
        height: f64,
        content: Affine,
    ) -> StrataResult<()> {
        self.ctx.push_view_box(width, height);
        let res = self.with_discrete_layer(true, &GroupParams::default(), |this| {
            let (w, h) = this.ctx.view_box_size()?;
            this.ctx
                .push_clip(&Rect::new(0.0, 0.0, w, h).to_path(0.1), FillRule::NonZero)?;
            this.ctx.concat_transform(content)?;
            this.render_children(id)
        });
        self.ctx.pop_view_box();
        res
    }

    fn render_children(&mut self, id: NodeId) -> StrataResult<()> {
        let doc = self.document;
        for child in doc.children(id)? {
            self.render_node(child)?;
        }
        Ok(())
    }

    fn render_element(&mut self, id: NodeId, node: &'a Node) -> StrataResult<()> {
        let coverage = matches!(self.mode, RenderMode::ClipCoverage(_));
        let group = if coverage {
            GroupParams::default()
        } else {
            GroupParams {
                opacity: node.opacity,
                comp_op: node.comp_op,
                filter: node.filter,
                mask: node.mask,
                clip_mask: None,
            }
        };
        if group.opacity <= 0.0 && group.comp_op.is_bounded() {
            return Ok(());
        }

        let saved = self.ctx.transform()?;
        self.ctx.concat_transform(node.transform)?;
        let res = self.render_clipped(id, node, group);
        let restored = self.ctx.set_transform(saved);
        res.and(restored)
    }

    /// Only a path clip opens a frame; plain elements draw straight into the current one.
    fn render_clipped(
        &mut self,
        id: NodeId,
        node: &'a Node,
        mut group: GroupParams,
    ) -> StrataResult<()> {
        let plan = match node.clip_path {
            Some(clip) => self.plan_clip(clip)?,
            None => return self.render_isolated(id, node, &group),
        };
        match plan {
            ClipPlan::Empty => Ok(()),
            ClipPlan::Path(path, rule) => {
                self.with_discrete_layer(true, &GroupParams::default(), |this| {
                    this.ctx.push_clip(&path, rule)?;
                    this.render_isolated(id, node, &group)
                })
            }
            ClipPlan::Mask => {
                group.clip_mask = node.clip_path;
                self.render_isolated(id, node, &group)
            }
        }
    }

    fn render_isolated(
        &mut self,
        id: NodeId,
        node: &'a Node,
        group: &GroupParams,
    ) -> StrataResult<()> {
        if self.ctx.clip_bounds()?.is_empty() {
            return Ok(());
        }
        if group.needs_isolation() {
            self.with_discrete_layer(false, group, |this| this.draw_kind(id, node))
        } else {
            self.draw_kind(id, node)
        }
    }

    fn plan_clip(&mut self, clip: NodeId) -> StrataResult<ClipPlan> {
        let doc = self.document;
        let clip_node = doc.node(clip)?;
        let NodeKind::ClipPath(data) = &clip_node.kind else {
            return Err(StrataError::validation(format!(
                "clip path reference {clip} points at a {}",
                clip_node.kind.name()
            )));
        };
        let mut shown = doc
            .children(clip)?
            .filter(|c| doc.node(*c).is_ok_and(|n| n.display));
        let Some(first) = shown.next() else {
            return Ok(ClipPlan::Empty);
        };
        if shown.next().is_some() {
            return Ok(ClipPlan::Mask);
        }
        let child = doc.node(first)?;
        match &child.kind {
            NodeKind::Shape(shape) if child.clip_path.is_none() && child.visible => {
                let path = clip_node.transform * child.transform * shape.path.clone();
                Ok(ClipPlan::Path(path, data.rule))
            }
            _ => Ok(ClipPlan::Mask),
        }
    }

    fn draw_kind(&mut self, id: NodeId, node: &'a Node) -> StrataResult<()> {
        match &node.kind {
            NodeKind::Group => self.render_children(id),
            NodeKind::Switch => {
                let doc = self.document;
                let first = doc
                    .children(id)?
                    .find(|c| doc.node(*c).is_ok_and(|n| n.display));
                match first {
                    Some(child) => self.render_node(child),
                    None => Ok(()),
                }
            }
            NodeKind::Use { href } => self.render_use(*href),
            NodeKind::Shape(shape) if node.visible => self.draw_shape(shape),
            NodeKind::Text(text) if node.visible => self.draw_text(text),
            NodeKind::Image(image) if node.visible => self.draw_image(image),
            _ => Ok(()),
        }
    }

    /// Resources reached through a use render as referenced content, in the use's user space.
    fn render_use(&mut self, href: NodeId) -> StrataResult<()> {
        if !self.resolving.enter(href) {
            return self.recover(StrataError::CyclicReference(href), "use");
        }
        let doc = self.document;
        let res = match doc.node(href) {
            Ok(target) if target.kind.is_resource() => self.render_referenced(href),
            Ok(_) => self.render_node(href),
            Err(e) => Err(e),
        };
        self.resolving.leave(href);
        res
    }

    fn draw_shape(&mut self, shape: &ShapeData) -> StrataResult<()> {
        if let RenderMode::ClipCoverage(rule) = self.mode {
            let target = self.sync_target()?;
            self.backend.fill_path(
                target,
                &shape.path,
                rule,
                &BackendPaint::Solid(Color::BLACK),
            )?;
            return self.insert_user_bbox(shape.path.bounding_box());
        }

        self.fill_with(&shape.path, shape.fill_rule, &shape.fill, shape.fill_opacity)?;
        if let Some(stroke) = &shape.stroke
            && stroke.width > 0.0
            && !stroke.paint.is_none()
        {
            let scale = self.ctx.transform()?.determinant().abs().sqrt().max(1e-6);
            let outline = kurbo::stroke(
                shape.path.iter(),
                &stroke.to_kurbo(),
                &StrokeOpts::default(),
                0.25 / scale,
            );
            self.fill_with(&outline, FillRule::NonZero, &stroke.paint, stroke.opacity)?;
        }
        if !shape.markers.is_empty() {
            self.draw_markers(shape)?;
        }
        Ok(())
    }

    fn fill_with(
        &mut self,
        path: &BezPath,
        rule: FillRule,
        paint: &Paint,
        opacity: f32,
    ) -> StrataResult<()> {
        match paint {
            Paint::None => Ok(()),
            Paint::Color(color) => {
                let color = color.with_opacity(opacity);
                if color.a == 0 {
                    return Ok(());
                }
                let target = self.sync_target()?;
                self.backend
                    .fill_path(target, path, rule, &BackendPaint::Solid(color))?;
                self.insert_user_bbox(path.bounding_box())
            }
            Paint::Pattern(pattern) => self.fill_with_pattern(*pattern, path, rule, opacity),
        }
    }

    /// Record a user-space rectangle in the extents of the current frame.
    fn insert_user_bbox(&mut self, rect: Rect) -> StrataResult<()> {
        let device = self.ctx.transform()?.transform_rect_bbox(rect);
        self.ctx.insert_bbox(device)
    }

    /// Fill with a pattern: render one tile offscreen, then let the backend repeat it.
    ///
    /// The tile grid is laid out along the device axes; only the scale of the current transform
    /// is applied to the tile itself.
    fn fill_with_pattern(
        &mut self,
        pattern_id: NodeId,
        path: &BezPath,
        rule: FillRule,
        opacity: f32,
    ) -> StrataResult<()> {
        let doc = self.document;
        let NodeKind::Pattern(pattern) = &doc.node(pattern_id)?.kind else {
            return Err(StrataError::validation(format!(
                "paint reference {pattern_id} is not a pattern"
            )));
        };
        let ctm = self.ctx.transform()?;
        let frame_bounds = self.ctx.top()?.bounds();
        let [a, b, c, d, _, _] = ctm.as_coeffs();
        let (sx, sy) = (a.hypot(b), c.hypot(d));
        let tw = (pattern.tile.width() * sx).round();
        let th = (pattern.tile.height() * sy).round();
        let tile_origin = ctm * Point::new(pattern.tile.x0, pattern.tile.y0);
        let origin = (
            tile_origin.x.round() as i32 - frame_bounds.x,
            tile_origin.y.round() as i32 - frame_bounds.y,
        );

        let tile = self.render_subtree_surface(
            pattern_id,
            tw as i32,
            th as i32,
            Affine::scale_non_uniform(sx, sy),
            origin,
            RenderMode::Paint,
        );
        match tile {
            Ok(tile) => {
                let paint = BackendPaint::Tile {
                    surface: tile.surface,
                    origin,
                    opacity,
                };
                let res = self
                    .sync_target()
                    .and_then(|target| self.backend.fill_path(target, path, rule, &paint));
                self.release(tile);
                res?;
                self.insert_user_bbox(path.bounding_box())
            }
            Err(e) => self.recover(e, "pattern"),
        }
    }

    fn draw_text(&mut self, text: &TextData) -> StrataResult<()> {
        let target = self.sync_target()?;
        let coverage = matches!(self.mode, RenderMode::ClipCoverage(_));
        for run in &text.runs {
            if coverage {
                let mut solid = run.clone();
                solid.color = Color::BLACK;
                self.backend.fill_glyphs(target, &solid)?;
            } else {
                self.backend.fill_glyphs(target, run)?;
            }
            if let Some(em_boxes) = glyph_run_bounds(run) {
                self.insert_user_bbox(em_boxes)?;
            }
        }
        Ok(())
    }

    fn draw_image(&mut self, image: &ImageData) -> StrataResult<()> {
        if matches!(self.mode, RenderMode::ClipCoverage(_)) {
            return Ok(());
        }
        let target = self.sync_target()?;
        self.backend.draw_image(target, image, 1.0)?;
        self.insert_user_bbox(image.dest)
    }

    fn draw_markers(&mut self, shape: &ShapeData) -> StrataResult<()> {
        let vertices = marker_vertices(&shape.path);
        let stroke_width = shape.stroke.as_ref().map_or(1.0, |s| s.width);
        let last = vertices.len().saturating_sub(1);
        for (i, v) in vertices.iter().enumerate() {
            let mut markers = smallvec::SmallVec::<[NodeId; 2]>::new();
            if i == 0 {
                markers.extend(shape.markers.start);
            }
            if i > 0 && i < last {
                markers.extend(shape.markers.mid);
            }
            if i == last {
                markers.extend(shape.markers.end);
            }
            for marker in markers {
                self.draw_marker(marker, v, stroke_width)?;
            }
        }
        Ok(())
    }

    fn draw_marker(
        &mut self,
        marker_id: NodeId,
        vertex: &Vertex,
        stroke_width: f64,
    ) -> StrataResult<()> {
        let doc = self.document;
        let NodeKind::Marker(marker) = &doc.node(marker_id)?.kind else {
            return Err(StrataError::validation(format!(
                "marker reference {marker_id} is not a marker"
            )));
        };
        let t = self.ctx.transform()? * marker_transform(marker, vertex, stroke_width);
        let viewport = Rect::new(0.0, 0.0, marker.width, marker.height);
        let bbox = PixelRect::round_out(t.transform_rect_bbox(viewport))
            .intersect(self.ctx.clip_bounds()?);
        if bbox.is_empty() {
            return Ok(());
        }
        let frame_bounds = self.ctx.top()?.bounds();
        let base = Affine::translate(Vec2::new(-f64::from(bbox.x), -f64::from(bbox.y))) * t;

        let rendered = self.render_subtree_surface(
            marker_id,
            bbox.width as i32,
            bbox.height as i32,
            base,
            (bbox.x, bbox.y),
            RenderMode::Paint,
        );
        match rendered {
            Ok(res) => {
                let offset = (bbox.x - frame_bounds.x, bbox.y - frame_bounds.y);
                let out = self.sync_target().and_then(|target| {
                    self.backend
                        .composite(target, res.surface, CompOp::SrcOver, 1.0, offset)
                });
                let ink = res.ink;
                self.release(res);
                out?;
                match ink {
                    Some(ink) => self.ctx.insert_bbox(ink.to_rect() + bbox_origin(bbox)),
                    None => Ok(()),
                }
            }
            Err(e) => self.recover(e, "marker"),
        }
    }
}

fn bbox_origin(bbox: PixelRect) -> Vec2 {
    Vec2::new(f64::from(bbox.x), f64::from(bbox.y))
}

/// Em boxes around the glyph origins of a run, in user space.
fn glyph_run_bounds(run: &GlyphRun) -> Option<Rect> {
    let size = f64::from(run.font_size);
    run.glyphs
        .iter()
        .map(|g| {
            let (x, y) = (f64::from(g.x), f64::from(g.y));
            Rect::new(x, y - size, x + size, y + size * 0.25)
        })
        .reduce(|a, b| a.union(b))
}

/// Marker content space to the user space of the marked shape.
pub(crate) fn marker_transform(marker: &MarkerData, vertex: &Vertex, stroke_width: f64) -> Affine {
    let rotation = match marker.orient {
        MarkerOrient::Auto => vertex.angle(),
        MarkerOrient::Angle(deg) => deg.to_radians(),
    };
    let scale = if marker.scale_by_stroke_width {
        stroke_width
    } else {
        1.0
    };
    Affine::translate(vertex.point.to_vec2())
        * Affine::rotate(rotation)
        * Affine::scale(scale)
        * Affine::translate(-marker.ref_point.to_vec2())
}

/// Vertices of `path` in order, closing segments included.
pub(crate) fn marker_vertices(path: &BezPath) -> Vec<Vertex> {
    use kurbo::PathEl;

    let mut out: Vec<Vertex> = Vec::new();
    let mut current = Point::ZERO;
    let mut subpath_start = 0usize;

    for el in path.elements() {
        match *el {
            PathEl::MoveTo(p) => {
                out.push(Vertex {
                    point: p,
                    incoming: None,
                    outgoing: None,
                });
                subpath_start = out.len() - 1;
                current = p;
            }
            PathEl::LineTo(p) => {
                let dir = p - current;
                push_segment(&mut out, dir, dir, p);
                current = p;
            }
            PathEl::QuadTo(c, p) => {
                let start_dir = non_zero(c - current, p - current);
                let end_dir = non_zero(p - c, p - current);
                push_segment(&mut out, start_dir, end_dir, p);
                current = p;
            }
            PathEl::CurveTo(c1, c2, p) => {
                let start_dir = non_zero(c1 - current, non_zero(c2 - current, p - current));
                let end_dir = non_zero(p - c2, non_zero(p - c1, p - current));
                push_segment(&mut out, start_dir, end_dir, p);
                current = p;
            }
            PathEl::ClosePath => {
                let Some(start) = out.get(subpath_start).map(|v| v.point) else {
                    continue;
                };
                let mut dir = start - current;
                if dir.hypot2() == 0.0 {
                    dir = out.last().and_then(|v| v.incoming).unwrap_or(Vec2::ZERO);
                }
                push_segment(&mut out, dir, dir, start);
                let first_out = out.get(subpath_start).and_then(|v| v.outgoing);
                if let Some(first) = out.get_mut(subpath_start) {
                    first.incoming = Some(dir);
                }
                if let Some(last) = out.last_mut() {
                    last.outgoing = first_out;
                }
                current = start;
            }
        }
    }
    out
}

fn push_segment(out: &mut Vec<Vertex>, out_dir: Vec2, in_dir: Vec2, to: Point) {
    if let Some(last) = out.last_mut()
        && last.outgoing.is_none()
    {
        last.outgoing = Some(out_dir);
    }
    out.push(Vertex {
        point: to,
        incoming: Some(in_dir),
        outgoing: None,
    });
}

fn non_zero(primary: Vec2, fallback: Vec2) -> Vec2 {
    if primary.hypot2() > 0.0 { primary } else { fallback }
}

#[cfg(test)]
#[path = "../../tests/unit/render/node.rs"]
mod tests;
