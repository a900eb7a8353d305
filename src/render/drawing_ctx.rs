use crate::foundation::core::PixelRect;
use crate::foundation::error::{StrataError, StrataResult};
use crate::render::backend::{DrawingBackend, DrawingHandle, SurfaceId};
use crate::render::context::RenderContext;
use crate::render::session::RenderOpts;
use crate::render::subtree::{NodeRenderResult, ResolutionSet};
use crate::scene::document::Document;
use crate::scene::paint::FillRule;

/// What draw calls produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    /// Regular painting.
    Paint,
    /// Opaque coverage of clip path content: fills only, black, with the given clip rule.
    ClipCoverage(FillRule),
}

/// Counters collected during one render call.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct RenderStats {
    /// Discrete layers pushed (clip-only and group).
    pub layers_pushed: u64,
    /// Offscreen group surfaces allocated.
    pub group_surfaces: u64,
    /// Groups composited onto their parent.
    pub groups_composited: u64,
    /// Successful subtree renders.
    pub subtree_renders: u64,
    /// Recoverable failures turned into transparent content.
    pub recovered_errors: u64,
    /// Pixels of the output target touched by the render; filled in by [`DrawingCtx::into_stats`].
    pub ink_bounds: Option<PixelRect>,
}

/// Per-render drawing state: the document, the backend, the frame stack and the set of nodes
/// being resolved.
///
/// One value exists per top-level render call; nothing is shared between calls.
pub struct DrawingCtx<'a, B: DrawingBackend + ?Sized> {
    pub(crate) document: &'a Document,
    pub(crate) backend: &'a mut B,
    pub(crate) ctx: RenderContext,
    pub(crate) opts: RenderOpts,
    pub(crate) resolving: ResolutionSet,
    pub(crate) mode: RenderMode,
    pub(crate) stats: RenderStats,
    synced: Option<(DrawingHandle, u64)>,
}

impl<'a, B: DrawingBackend + ?Sized> DrawingCtx<'a, B> {
    /// Unbound drawing context over `document` and `backend`.
    pub fn new(document: &'a Document, backend: &'a mut B, opts: &RenderOpts) -> Self {
        Self {
            document,
            backend,
            ctx: RenderContext::new(),
            opts: opts.clone(),
            resolving: ResolutionSet::default(),
            mode: RenderMode::Paint,
            stats: RenderStats::default(),
            synced: None,
        }
    }

    /// Bind `target` as the root frame.
    pub fn bind_root(&mut self, target: SurfaceId) -> StrataResult<()> {
        let (width, height) = self.backend.surface_size(target)?;
        let handle = self.bind(target)?;
        self.ctx.bind_root(handle, width, height)
    }

    /// Frame stack.
    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    /// Frame stack, mutably (transform and clip edits).
    pub fn context_mut(&mut self) -> &mut RenderContext {
        &mut self.ctx
    }

    /// Document being rendered.
    pub fn document(&self) -> &'a Document {
        self.document
    }

    /// Backend.
    pub fn backend(&self) -> &B {
        &*self.backend
    }

    /// Backend, mutably.
    pub fn backend_mut(&mut self) -> &mut B {
        self.synced = None;
        &mut *self.backend
    }

    /// Nodes currently being resolved through the subtree renderer.
    pub fn resolution_set(&self) -> &ResolutionSet {
        &self.resolving
    }

    /// Counters so far.
    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    /// Extents drawn onto the root target so far.
    pub fn ink_bounds(&self) -> Option<PixelRect> {
        self.ctx.frame(0).and_then(|root| root.ink_bounds())
    }

    /// Consume the context, returning its counters and the root extents.
    pub fn into_stats(mut self) -> RenderStats {
        self.stats.ink_bounds = self.ink_bounds();
        self.stats
    }

    /// Release a surface returned by the subtree renderer.
    pub fn release(&mut self, result: NodeRenderResult) {
        self.backend.release_surface(result.surface);
    }

    pub(crate) fn bind(&mut self, surface: SurfaceId) -> StrataResult<DrawingHandle> {
        self.synced = None;
        self.backend.bind_target(surface)
    }

    /// Push the top frame's transform and clip to its target and return the handle.
    pub(crate) fn sync_target(&mut self) -> StrataResult<DrawingHandle> {
        let top = self.ctx.top()?;
        let handle = top.target();
        self.backend.set_transform(handle, top.target_transform())?;
        let generation = self.ctx.clip_generation();
        if self.synced != Some((handle, generation)) {
            let clips = top.target_clips();
            self.backend.set_clip(handle, &clips)?;
            self.synced = Some((handle, generation));
        }
        Ok(handle)
    }

    /// Turn a recoverable reference failure into "nothing drawn".
    pub(crate) fn recover(&mut self, err: StrataError, what: &str) -> StrataResult<()> {
        if self.opts.recover_reference_errors && err.is_recoverable() {
            tracing::warn!(error = %err, what, "referenced content rendered as transparent");
            self.stats.recovered_errors += 1;
            Ok(())
        } else {
            Err(err)
        }
    }
}
