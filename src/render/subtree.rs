use std::collections::HashSet;

use crate::foundation::core::{Affine, PixelRect};
use crate::foundation::error::{StrataError, StrataResult};
use crate::render::backend::{DrawingBackend, SurfaceId};
use crate::render::drawing_ctx::{DrawingCtx, RenderMode};
use crate::scene::NodeId;

/// Surface produced by rendering a subtree in isolation. The caller owns it and must hand it back
/// through [`DrawingCtx::release`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeRenderResult {
    /// Rendered surface.
    pub surface: SurfaceId,
    /// Device position the caller chose for the surface.
    pub origin: (i32, i32),
    /// Surface width.
    pub width: u32,
    /// Surface height.
    pub height: u32,
    /// Pixels of the surface the subtree drew into, in surface coordinates. `None` when nothing
    /// was drawn.
    pub ink: Option<PixelRect>,
}

/// Nodes whose subtree rendering is in progress.
#[derive(Debug, Default, Clone)]
pub struct ResolutionSet {
    nodes: HashSet<NodeId>,
}

impl ResolutionSet {
    /// Mark `node` as in progress. Returns `false` if it already was (a cycle).
    pub fn enter(&mut self, node: NodeId) -> bool {
        self.nodes.insert(node)
    }

    /// Mark `node` as done.
    pub fn leave(&mut self, node: NodeId) {
        self.nodes.remove(&node);
    }

    /// Return `true` if `node` is in progress.
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Number of nodes in progress.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Return `true` when nothing is being resolved.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<'a, B: DrawingBackend + ?Sized> DrawingCtx<'a, B> {
    /// Render `node` and its subtree onto a fresh transparent `width x height` surface,
    /// independent of the ambient transform, clip and opacity.
    pub fn get_surface_of_node(
        &mut self,
        node: NodeId,
        width: i32,
        height: i32,
    ) -> StrataResult<NodeRenderResult> {
        self.get_surface_of_node_with_transform(node, width, height, Affine::IDENTITY, (0, 0))
    }

    /// Like [`Self::get_surface_of_node`], drawing with `base` as the root transform and reporting
    /// `origin` as the surface position.
    pub fn get_surface_of_node_with_transform(
        &mut self,
        node: NodeId,
        width: i32,
        height: i32,
        base: Affine,
        origin: (i32, i32),
    ) -> StrataResult<NodeRenderResult> {
        self.render_subtree_surface(node, width, height, base, origin, RenderMode::Paint)
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, node, base, origin, mode),
        fields(node = %node)
    )]
    pub(crate) fn render_subtree_surface(
        &mut self,
        node: NodeId,
        width: i32,
        height: i32,
        base: Affine,
        origin: (i32, i32),
        mode: RenderMode,
    ) -> StrataResult<NodeRenderResult> {
        if width <= 0 || height <= 0 {
            return Err(StrataError::invalid_dimensions(width, height));
        }
        self.document.node(node)?;
        if !self.resolving.enter(node) {
            return Err(StrataError::CyclicReference(node));
        }
        let res = self.render_detached(node, width as u32, height as u32, base, mode);
        self.resolving.leave(node);

        let (surface, ink) = res?;
        self.stats.subtree_renders += 1;
        Ok(NodeRenderResult {
            surface,
            origin,
            width: width as u32,
            height: height as u32,
            ink,
        })
    }

    /// Swap in a fresh stack rooted at a new surface, draw, and put the ambient stack back.
    fn render_detached(
        &mut self,
        node: NodeId,
        width: u32,
        height: u32,
        base: Affine,
        mode: RenderMode,
    ) -> StrataResult<(SurfaceId, Option<PixelRect>)> {
        let surface = self.backend.create_surface(width, height)?;
        let saved = self.ctx.take_stack();
        let saved_mode = std::mem::replace(&mut self.mode, mode);

        let mut res = self.draw_detached(node, surface, width, height, base);
        if res.is_ok() && self.ctx.depth() != 1 {
            res = Err(StrataError::mismatched_layers(
                "subtree render left layers open",
            ));
        }
        if res.is_err() {
            self.unwind_to(1);
        }
        let ink = self.ctx.top().ok().and_then(|root| root.ink_bounds());

        self.ctx.restore_stack(saved);
        self.mode = saved_mode;
        match res {
            Ok(()) => Ok((surface, ink)),
            Err(e) => {
                self.backend.release_surface(surface);
                Err(e)
            }
        }
    }

    fn draw_detached(
        &mut self,
        node: NodeId,
        surface: SurfaceId,
        width: u32,
        height: u32,
        base: Affine,
    ) -> StrataResult<()> {
        let handle = self.bind(surface)?;
        self.ctx.bind_root(handle, width, height)?;
        self.ctx.set_transform(base)?;
        self.render_referenced(node)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/subtree.rs"]
mod tests;
