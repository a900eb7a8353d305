use crate::effects::composite::CompOp;
use crate::foundation::core::{Affine, BezPath, PixelRect, Rect, Vec2};
use crate::foundation::error::{StrataError, StrataResult};
use crate::render::backend::{ClipPath, DrawingHandle, SurfaceId};
use crate::render::layer::GroupParams;
use crate::scene::paint::FillRule;

/// Role of a frame on the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    /// Caller-supplied output target; never popped mid-render.
    Root,
    /// Clip-only scope sharing its parent's target.
    Clip,
    /// Isolated group drawing into its own surface.
    Group,
}

/// One entry of the frame stack.
///
/// Transforms and clip paths are kept in root-device space; `bounds` places the frame's target
/// surface in that same space.
#[derive(Clone, Debug)]
pub struct Frame {
    pub(crate) kind: LayerKind,
    pub(crate) target: DrawingHandle,
    pub(crate) owned_surface: Option<SurfaceId>,
    pub(crate) bounds: PixelRect,
    pub(crate) transform: Affine,
    pub(crate) clips: Vec<ClipPath>,
    pub(crate) opacity: f32,
    pub(crate) comp_op: CompOp,
    pub(crate) group: Option<GroupParams>,
    // Transform in effect when the frame was pushed; masks and filters are resolved against it.
    pub(crate) push_transform: Affine,
    // Root-device extents of everything drawn into this frame so far, clipped.
    pub(crate) ink: Option<Rect>,
}

impl Frame {
    /// Layer kind.
    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    /// Handle draws go to.
    pub fn target(&self) -> DrawingHandle {
        self.target
    }

    /// Surface owned by this frame, if it is a group.
    pub fn owned_surface(&self) -> Option<SurfaceId> {
        self.owned_surface
    }

    /// Placement of the target surface in root-device space.
    pub fn bounds(&self) -> PixelRect {
        self.bounds
    }

    /// Product of the opacities of all groups up to and including this frame.
    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Operator recorded for this frame.
    pub fn comp_op(&self) -> CompOp {
        self.comp_op
    }

    /// Device pixels touched by drawing in this frame and in the layers popped into it.
    ///
    /// `None` while nothing has been drawn.
    pub fn ink_bounds(&self) -> Option<PixelRect> {
        self.ink
            .map(PixelRect::round_out)
            .filter(|r| !r.is_empty())
    }

    /// Transform from user space into the frame's target pixels.
    pub fn target_transform(&self) -> Affine {
        Affine::translate(Vec2::new(
            -f64::from(self.bounds.x),
            -f64::from(self.bounds.y),
        )) * self.transform
    }

    /// Clip paths translated into the frame's target pixels.
    pub fn target_clips(&self) -> Vec<ClipPath> {
        let shift = Affine::translate(Vec2::new(
            -f64::from(self.bounds.x),
            -f64::from(self.bounds.y),
        ));
        self.clips
            .iter()
            .map(|c| ClipPath {
                path: shift * c.path.clone(),
                rule: c.rule,
            })
            .collect()
    }
}

/// Frame stack detached by [`RenderContext::take_stack`].
#[derive(Debug, Default)]
#[must_use = "a detached stack must be handed back to restore_stack"]
pub struct SavedStack {
    frames: Vec<Frame>,
    view_boxes: Vec<(f64, f64)>,
}

/// Ordered stack of drawing frames plus the nested viewport sizes.
///
/// Pure bookkeeping: nothing here talks to a backend.
#[derive(Debug, Default)]
pub struct RenderContext {
    frames: Vec<Frame>,
    view_boxes: Vec<(f64, f64)>,
    clip_generation: u64,
}

impl RenderContext {
    /// Unbound context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the root target of a render.
    pub fn bind_root(
        &mut self,
        target: DrawingHandle,
        width: u32,
        height: u32,
    ) -> StrataResult<()> {
        if self.frames.len() > 1 {
            return Err(StrataError::mismatched_layers(
                "cannot rebind the root while layers are open",
            ));
        }
        self.frames.clear();
        self.frames.push(Frame {
            kind: LayerKind::Root,
            target,
            owned_surface: None,
            bounds: PixelRect::from_size(width, height),
            transform: Affine::IDENTITY,
            clips: Vec::new(),
            opacity: 1.0,
            comp_op: CompOp::SrcOver,
            group: None,
            push_transform: Affine::IDENTITY,
            ink: None,
        });
        self.view_boxes.clear();
        self.view_boxes.push((f64::from(width), f64::from(height)));
        self.bump_clip_generation();
        Ok(())
    }

    /// Handle of the active target.
    pub fn current_target(&self) -> StrataResult<DrawingHandle> {
        Ok(self.top()?.target)
    }

    /// Number of frames, root included. Zero when unbound.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of isolated group layers on the stack.
    pub fn group_depth(&self) -> usize {
        self.frames
            .iter()
            .filter(|f| f.kind == LayerKind::Group)
            .count()
    }

    /// Return `true` once a root has been bound.
    pub fn is_bound(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Topmost frame.
    pub fn top(&self) -> StrataResult<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| StrataError::unbound("no root target has been bound"))
    }

    fn top_mut(&mut self) -> StrataResult<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| StrataError::unbound("no root target has been bound"))
    }

    /// Frame at `index` from the bottom.
    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Current user-to-root-device transform.
    pub fn transform(&self) -> StrataResult<Affine> {
        Ok(self.top()?.transform)
    }

    /// Replace the current transform.
    pub fn set_transform(&mut self, transform: Affine) -> StrataResult<()> {
        self.top_mut()?.transform = transform;
        Ok(())
    }

    /// Post-multiply the current transform (`ctm * transform`).
    pub fn concat_transform(&mut self, transform: Affine) -> StrataResult<()> {
        let top = self.top_mut()?;
        top.transform *= transform;
        Ok(())
    }

    /// Clip paths of the top frame, in root-device space.
    pub fn clip_paths(&self) -> StrataResult<&[ClipPath]> {
        Ok(&self.top()?.clips)
    }

    /// Intersect the clip of the top frame with a user-space path.
    pub fn push_clip(&mut self, path: &BezPath, rule: FillRule) -> StrataResult<()> {
        let top = self.top_mut()?;
        let device = top.transform * path.clone();
        top.clips.push(ClipPath { path: device, rule });
        self.bump_clip_generation();
        Ok(())
    }

    /// Device bounds of the current clip intersected with the target bounds, rounded out.
    pub fn clip_bounds(&self) -> StrataResult<PixelRect> {
        let top = self.top()?;
        let mut bounds = top.bounds;
        for clip in &top.clips {
            bounds = bounds.intersect(PixelRect::round_out(kurbo::Shape::bounding_box(&clip.path)));
            if bounds.is_empty() {
                break;
            }
        }
        Ok(bounds)
    }

    /// Merge a root-device rectangle into the extents of the top frame, cut to the current clip.
    pub fn insert_bbox(&mut self, rect: Rect) -> StrataResult<()> {
        let clipped = rect.intersect(self.clip_bounds()?.to_rect());
        if !(clipped.width() > 0.0 && clipped.height() > 0.0) {
            return Ok(());
        }
        let top = self.top_mut()?;
        top.ink = Some(top.ink.map_or(clipped, |ink| ink.union(clipped)));
        Ok(())
    }

    pub(crate) fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
        self.bump_clip_generation();
    }

    /// Pop the top frame unless it is the root.
    pub(crate) fn pop_frame(&mut self) -> Option<Frame> {
        if self.frames.len() <= 1 {
            return None;
        }
        let frame = self.frames.pop();
        self.bump_clip_generation();
        frame
    }

    /// Detach the whole stack, leaving the context unbound.
    pub fn take_stack(&mut self) -> SavedStack {
        self.bump_clip_generation();
        SavedStack {
            frames: std::mem::take(&mut self.frames),
            view_boxes: std::mem::take(&mut self.view_boxes),
        }
    }

    /// Reattach a stack detached by [`Self::take_stack`], dropping whatever is bound now.
    pub fn restore_stack(&mut self, saved: SavedStack) {
        self.frames = saved.frames;
        self.view_boxes = saved.view_boxes;
        self.bump_clip_generation();
    }

    /// Enter a nested viewport.
    pub fn push_view_box(&mut self, width: f64, height: f64) {
        self.view_boxes.push((width, height));
    }

    /// Leave a nested viewport. The outermost one stays in place.
    pub fn pop_view_box(&mut self) {
        if self.view_boxes.len() > 1 {
            self.view_boxes.pop();
        }
    }

    /// Size of the innermost viewport.
    pub fn view_box_size(&self) -> StrataResult<(f64, f64)> {
        self.view_boxes
            .last()
            .copied()
            .ok_or_else(|| StrataError::unbound("no viewport established"))
    }

    /// Counter bumped whenever the effective clip of the top frame may have changed.
    pub(crate) fn clip_generation(&self) -> u64 {
        self.clip_generation
    }

    fn bump_clip_generation(&mut self) {
        self.clip_generation = self.clip_generation.wrapping_add(1);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/context.rs"]
mod tests;
