use std::ops::{Deref, DerefMut};

use crate::effects::composite::CompOp;
use crate::effects::filter::{Filter, FilterPrimitive, PixelPass};
use crate::effects::mask::MaskMode;
use crate::foundation::core::{Affine, PixelRect, Rect, Rgba8Premul, Vec2};
use crate::foundation::error::{StrataError, StrataResult};
use crate::render::backend::{DrawingBackend, SurfaceId};
use crate::render::context::{Frame, LayerKind};
use crate::render::drawing_ctx::{DrawingCtx, RenderMode};
use crate::scene::NodeId;
use crate::scene::document::NodeKind;

/// Compositing parameters recorded by an isolated-group push.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupParams {
    /// Constant alpha applied when compositing onto the parent.
    pub opacity: f32,
    /// Operator used against the parent.
    pub comp_op: CompOp,
    /// Filter node run on the group before masking.
    pub filter: Option<NodeId>,
    /// Mask node multiplied into the group.
    pub mask: Option<NodeId>,
    /// Clip path node applied as an alpha mask, for clips that are not a single path.
    pub clip_mask: Option<NodeId>,
}

impl Default for GroupParams {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            comp_op: CompOp::SrcOver,
            filter: None,
            mask: None,
            clip_mask: None,
        }
    }
}

impl GroupParams {
    /// Plain group with the given opacity.
    pub fn with_opacity(opacity: f32) -> Self {
        Self {
            opacity,
            ..Self::default()
        }
    }

    /// Return `true` when drawing straight into the parent would differ from drawing through an
    /// offscreen surface.
    pub fn needs_isolation(&self) -> bool {
        self.opacity < 1.0
            || self.comp_op != CompOp::SrcOver
            || self.filter.is_some()
            || self.mask.is_some()
            || self.clip_mask.is_some()
    }
}

impl<'a, B: DrawingBackend + ?Sized> DrawingCtx<'a, B> {
    /// Open a clip-only (`clipping = true`) or isolated-group layer.
    ///
    /// A failed push leaves the stack untouched; no pop may follow it.
    pub fn push_discrete_layer(&mut self, clipping: bool, group: &GroupParams) -> StrataResult<()> {
        let depth = self.ctx.depth();
        let parent = self.ctx.top()?;
        let (target, transform, opacity) = (parent.target(), parent.transform, parent.opacity);

        if clipping {
            let frame = Frame {
                kind: LayerKind::Clip,
                target,
                owned_surface: None,
                bounds: parent.bounds,
                transform,
                clips: parent.clips.clone(),
                opacity,
                comp_op: parent.comp_op,
                group: None,
                push_transform: transform,
                ink: None,
            };
            self.ctx.push_frame(frame);
            self.stats.layers_pushed += 1;
            tracing::trace!(depth = depth + 1, "pushed clip layer");
            return Ok(());
        }

        if self.ctx.group_depth() >= self.opts.max_layer_depth {
            return Err(StrataError::validation(format!(
                "group nesting exceeds {} layers",
                self.opts.max_layer_depth
            )));
        }
        let bounds = self.ctx.clip_bounds()?;
        if bounds.is_empty() {
            return Err(StrataError::allocation("group layer bounds are empty"));
        }
        let surface = self.backend.create_surface(bounds.width, bounds.height)?;
        let handle = match self.bind(surface) {
            Ok(h) => h,
            Err(e) => {
                self.backend.release_surface(surface);
                return Err(e);
            }
        };
        self.ctx.push_frame(Frame {
            kind: LayerKind::Group,
            target: handle,
            owned_surface: Some(surface),
            bounds,
            transform,
            // The parent's clip is applied when the group is composited back.
            clips: Vec::new(),
            opacity: opacity * group.opacity,
            comp_op: group.comp_op,
            group: Some(group.clone()),
            push_transform: transform,
            ink: None,
        });
        self.stats.layers_pushed += 1;
        self.stats.group_surfaces += 1;
        tracing::debug!(
            depth = depth + 1,
            surface = surface.0,
            x = bounds.x,
            y = bounds.y,
            width = bounds.width,
            height = bounds.height,
            "pushed group layer"
        );
        Ok(())
    }

    /// Close the top layer. `clipping` must match the flag of its push.
    pub fn pop_discrete_layer(&mut self, clipping: bool) -> StrataResult<()> {
        let kind = self.ctx.top()?.kind();
        match (kind, clipping) {
            (LayerKind::Clip, true) | (LayerKind::Group, false) => {}
            (LayerKind::Root, _) => {
                return Err(StrataError::mismatched_layers(
                    "pop without a matching push",
                ));
            }
            (kind, _) => {
                return Err(StrataError::mismatched_layers(format!(
                    "pop with clipping={clipping} closes a {kind:?} layer"
                )));
            }
        }
        let Some(frame) = self.ctx.pop_frame() else {
            return Err(StrataError::mismatched_layers("pop without a matching push"));
        };
        if clipping {
            tracing::trace!(depth = self.ctx.depth(), "popped clip layer");
            return match frame.ink {
                Some(ink) => self.ctx.insert_bbox(ink),
                None => Ok(()),
            };
        }

        let Some(surface) = frame.owned_surface else {
            return Err(StrataError::mismatched_layers("group layer without a surface"));
        };
        let res = self.finish_group(&frame, surface);
        self.backend.release_surface(surface);
        tracing::debug!(
            depth = self.ctx.depth(),
            surface = surface.0,
            ok = res.is_ok(),
            "popped group layer"
        );
        res?;
        self.stats.groups_composited += 1;
        match group_ink(&frame) {
            Some(ink) => self.ctx.insert_bbox(ink),
            None => Ok(()),
        }
    }

    /// Push a layer and return a guard that discards it unless finished.
    pub fn discrete_layer(
        &mut self,
        clipping: bool,
        group: &GroupParams,
    ) -> StrataResult<LayerGuard<'_, 'a, B>> {
        let depth = self.ctx.depth();
        self.push_discrete_layer(clipping, group)?;
        Ok(LayerGuard {
            dc: self,
            clipping,
            depth,
            done: false,
        })
    }

    /// Run `f` inside a layer: popped on success, discarded on error.
    pub fn with_discrete_layer<R>(
        &mut self,
        clipping: bool,
        group: &GroupParams,
        f: impl FnOnce(&mut Self) -> StrataResult<R>,
    ) -> StrataResult<R> {
        let mut guard = self.discrete_layer(clipping, group)?;
        let out = f(&mut guard)?;
        guard.finish()?;
        Ok(out)
    }

    /// Discard every frame above `depth` (the root always stays), releasing owned surfaces.
    pub fn unwind_to(&mut self, depth: usize) {
        while self.ctx.depth() > depth.max(1) {
            let Some(frame) = self.ctx.pop_frame() else {
                break;
            };
            if let Some(surface) = frame.owned_surface {
                self.backend.release_surface(surface);
            }
            tracing::debug!(depth = self.ctx.depth(), kind = ?frame.kind(), "discarded layer");
        }
    }

    fn finish_group(&mut self, frame: &Frame, surface: SurfaceId) -> StrataResult<()> {
        let group = frame.group.clone().unwrap_or_default();
        if let Some(filter) = group.filter {
            self.apply_filter_node(filter, surface, frame)?;
        }
        if let Some(mask) = group.mask {
            let doc = self.document;
            let mode = match &doc.node(mask)?.kind {
                NodeKind::Mask(m) => m.mode,
                other => {
                    return Err(StrataError::validation(format!(
                        "mask reference {mask} points at a {}",
                        other.name()
                    )));
                }
            };
            self.apply_mask_node(mask, surface, frame, mode, RenderMode::Paint)?;
        }
        if let Some(clip) = group.clip_mask {
            let doc = self.document;
            let rule = match &doc.node(clip)?.kind {
                NodeKind::ClipPath(c) => c.rule,
                other => {
                    return Err(StrataError::validation(format!(
                        "clip path reference {clip} points at a {}",
                        other.name()
                    )));
                }
            };
            let coverage = RenderMode::ClipCoverage(rule);
            self.apply_mask_node(clip, surface, frame, MaskMode::Alpha, coverage)?;
        }

        let parent = self.ctx.top()?.bounds();
        let dst = self.sync_target()?;
        let offset = (frame.bounds.x - parent.x, frame.bounds.y - parent.y);
        self.backend.composite(dst, surface, group.comp_op, group.opacity, offset)
    }

    /// Render `node` aligned with the group surface and multiply the group by it.
    fn apply_mask_node(
        &mut self,
        node: NodeId,
        surface: SurfaceId,
        frame: &Frame,
        mode: MaskMode,
        render_mode: RenderMode,
    ) -> StrataResult<()> {
        let bounds = frame.bounds;
        let (w, h) = surface_dims(bounds);
        let origin = (bounds.x, bounds.y);
        match self.render_subtree_surface(node, w, h, group_base(frame), origin, render_mode) {
            Ok(mask) => {
                let res = self.backend.apply_mask(surface, mask.surface, mode);
                self.release(mask);
                res
            }
            Err(e) => {
                self.recover(e, "mask")?;
                self.clear_surface(surface)
            }
        }
    }

    fn apply_filter_node(
        &mut self,
        filter_id: NodeId,
        surface: SurfaceId,
        frame: &Frame,
    ) -> StrataResult<()> {
        let doc = self.document;
        let NodeKind::Filter(filter) = &doc.node(filter_id)?.kind else {
            return Err(StrataError::validation(format!(
                "filter reference {filter_id} is not a filter"
            )));
        };
        if !self.resolving.enter(filter_id) {
            self.recover(StrataError::CyclicReference(filter_id), "filter")?;
            return self.clear_surface(surface);
        }

        let source = if filter
            .primitives
            .iter()
            .any(|p| matches!(p, FilterPrimitive::MergeSource { .. }))
        {
            match self.snapshot(surface, frame.bounds) {
                Ok(s) => Some(s),
                Err(e) => {
                    self.resolving.leave(filter_id);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let res = self.run_filter(filter, surface, source, frame);
        if let Some(s) = source {
            self.backend.release_surface(s);
        }
        self.resolving.leave(filter_id);
        res
    }

    fn run_filter(
        &mut self,
        filter: &Filter,
        surface: SurfaceId,
        source: Option<SurfaceId>,
        frame: &Frame,
    ) -> StrataResult<()> {
        let ctm = frame.push_transform;
        let scale = ctm.determinant().abs().sqrt() as f32;
        let [a, b, c, d, _, _] = ctm.as_coeffs();

        for prim in &filter.primitives {
            match prim {
                FilterPrimitive::GaussianBlur { std_dev } => {
                    self.backend.apply_filter(surface, &PixelPass::blur(std_dev * scale))?;
                }
                FilterPrimitive::Offset { dx, dy } => {
                    let device = Vec2::new(a * dx + c * dy, b * dx + d * dy);
                    let pass = PixelPass::Offset {
                        dx: device.x.round() as i32,
                        dy: device.y.round() as i32,
                    };
                    self.backend.apply_filter(surface, &pass)?;
                }
                FilterPrimitive::ColorMatrix { matrix } => {
                    self.backend.apply_filter(surface, &PixelPass::ColorMatrix(*matrix))?;
                }
                FilterPrimitive::Flood { color } => {
                    self.backend.apply_filter(surface, &PixelPass::Flood(color.premultiplied()))?;
                }
                FilterPrimitive::Image { node } => {
                    let bounds = frame.bounds;
                    let (w, h) = surface_dims(bounds);
                    let rendered = self.render_subtree_surface(
                        *node,
                        w,
                        h,
                        group_base(frame),
                        (bounds.x, bounds.y),
                        RenderMode::Paint,
                    );
                    match rendered {
                        Ok(image) => {
                            let res = self.bind(surface).and_then(|h| {
                                self.backend
                                    .composite(h, image.surface, CompOp::Src, 1.0, (0, 0))
                            });
                            self.release(image);
                            res?;
                        }
                        Err(e) => {
                            self.recover(e, "filter image")?;
                            self.clear_surface(surface)?;
                        }
                    }
                }
                FilterPrimitive::MergeSource { op } => {
                    if let Some(src) = source {
                        let h = self.bind(surface)?;
                        self.backend.composite(h, src, *op, 1.0, (0, 0))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Copy a group surface so the source graphic survives the filter chain.
    fn snapshot(&mut self, surface: SurfaceId, bounds: PixelRect) -> StrataResult<SurfaceId> {
        let copy = self.backend.create_surface(bounds.width, bounds.height)?;
        let res = self
            .bind(copy)
            .and_then(|h| self.backend.composite(h, surface, CompOp::Src, 1.0, (0, 0)));
        match res {
            Ok(()) => Ok(copy),
            Err(e) => {
                self.backend.release_surface(copy);
                Err(e)
            }
        }
    }

    fn clear_surface(&mut self, surface: SurfaceId) -> StrataResult<()> {
        self.backend
            .apply_filter(surface, &PixelPass::Flood(Rgba8Premul::transparent()))
    }
}

/// Extents a composited group leaves on its parent.
///
/// Filters may spread past what was drawn and unbounded operators touch the whole layer.
fn group_ink(frame: &Frame) -> Option<Rect> {
    let group = frame.group.as_ref()?;
    if group.filter.is_some() || !group.comp_op.is_bounded() {
        Some(frame.bounds.to_rect())
    } else {
        frame.ink
    }
}

/// Base transform mapping the group's user space onto its own surface.
fn group_base(frame: &Frame) -> Affine {
    Affine::translate(Vec2::new(
        -f64::from(frame.bounds.x),
        -f64::from(frame.bounds.y),
    )) * frame.push_transform
}

fn surface_dims(bounds: PixelRect) -> (i32, i32) {
    (
        i32::try_from(bounds.width).unwrap_or(i32::MAX),
        i32::try_from(bounds.height).unwrap_or(i32::MAX),
    )
}

/// Scoped layer: derefs to the [`DrawingCtx`], pops on [`LayerGuard::finish`], discards on drop.
pub struct LayerGuard<'g, 'a, B: DrawingBackend + ?Sized> {
    dc: &'g mut DrawingCtx<'a, B>,
    clipping: bool,
    depth: usize,
    done: bool,
}

impl<'g, 'a, B: DrawingBackend + ?Sized> LayerGuard<'g, 'a, B> {
    /// Depth of the stack below this layer.
    pub fn base_depth(&self) -> usize {
        self.depth
    }

    /// Pop the layer, compositing it if it is a group.
    pub fn finish(mut self) -> StrataResult<()> {
        self.done = true;
        if self.dc.ctx.depth() != self.depth + 1 {
            self.dc.unwind_to(self.depth);
            return Err(StrataError::mismatched_layers(
                "layer finished while inner layers were still open",
            ));
        }
        let clipping = self.clipping;
        self.dc.pop_discrete_layer(clipping)
    }
}

impl<'g, 'a, B: DrawingBackend + ?Sized> Deref for LayerGuard<'g, 'a, B> {
    type Target = DrawingCtx<'a, B>;

    fn deref(&self) -> &Self::Target {
        self.dc
    }
}

impl<'g, 'a, B: DrawingBackend + ?Sized> DerefMut for LayerGuard<'g, 'a, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.dc
    }
}

impl<'g, 'a, B: DrawingBackend + ?Sized> Drop for LayerGuard<'g, 'a, B> {
    fn drop(&mut self) {
        if !self.done {
            self.dc.unwind_to(self.depth);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/layer.rs"]
mod tests;
