use crate::effects::composite::CompOp;
use crate::effects::filter::PixelPass;
use crate::effects::mask::MaskMode;
use crate::foundation::core::{Affine, BezPath, Color};
use crate::foundation::error::{StrataError, StrataResult};
use crate::scene::document::{GlyphRun, ImageData};
use crate::scene::paint::FillRule;

/// Backend surface identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

/// Opaque handle to a surface bound for drawing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DrawingHandle {
    surface: SurfaceId,
}

impl DrawingHandle {
    /// Build a handle for a bound surface. Only backends should call this.
    pub fn new(surface: SurfaceId) -> Self {
        Self { surface }
    }

    /// Surface this handle draws into.
    pub fn surface(self) -> SurfaceId {
        self.surface
    }
}

/// Clip path in the device space of the surface it is applied to.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipPath {
    /// Outline.
    pub path: BezPath,
    /// `clip-rule`.
    pub rule: FillRule,
}

/// Paint understood by backends.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BackendPaint {
    /// Solid straight-alpha color (opacity already folded in).
    Solid(Color),
    /// Repeat a surface across the plane.
    Tile {
        /// Tile content.
        surface: SurfaceId,
        /// Device position of one tile origin on the target surface.
        origin: (i32, i32),
        /// Constant opacity.
        opacity: f32,
    },
}

/// A rendered frame as RGBA8 pixels.
///
/// Frames are **premultiplied alpha**; the `premultiplied` flag makes that explicit at API
/// boundaries.
#[derive(Clone, Debug)]
pub struct FrameRGBA {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// RGBA8 bytes, tightly packed, row-major.
    pub data: Vec<u8>,
    /// Whether the `data` is premultiplied alpha.
    pub premultiplied: bool,
}

impl FrameRGBA {
    /// Pixel at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + x as usize) * 4;
        Some([self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]])
    }

    /// Convert to a straight-alpha `image` buffer.
    pub fn to_rgba_image(&self) -> StrataResult<image::RgbaImage> {
        let mut data = self.data.clone();
        if self.premultiplied {
            for px in data.chunks_exact_mut(4) {
                let a = u16::from(px[3]);
                if a == 0 {
                    continue;
                }
                for c in &mut px[..3] {
                    *c = ((u16::from(*c) * 255 + a / 2) / a).min(255) as u8;
                }
            }
        }
        image::RgbaImage::from_raw(self.width, self.height, data)
            .ok_or_else(|| StrataError::validation("frame buffer length does not match its size"))
    }

    /// Encode as PNG.
    pub fn save_png(&self, path: impl AsRef<std::path::Path>) -> StrataResult<()> {
        let img = self.to_rgba_image()?;
        img.save_with_format(path.as_ref(), image::ImageFormat::Png)
            .map_err(|e| StrataError::Other(anyhow::Error::new(e)))
    }
}

/// Low-level drawing primitives the render core is written against.
///
/// Backends own surfaces and their per-surface drawing state (transform and clip). The core only
/// holds [`SurfaceId`]s and [`DrawingHandle`]s, and always re-sends state after switching
/// targets.
pub trait DrawingBackend {
    /// Allocate a transparent `width x height` surface.
    fn create_surface(&mut self, width: u32, height: u32) -> StrataResult<SurfaceId>;

    /// Return a surface to the backend. Unknown ids are ignored.
    fn release_surface(&mut self, surface: SurfaceId);

    /// Size of a live surface.
    fn surface_size(&self, surface: SurfaceId) -> StrataResult<(u32, u32)>;

    /// Make `surface` drawable, resetting its transform to identity and its clip to none.
    fn bind_target(&mut self, surface: SurfaceId) -> StrataResult<DrawingHandle>;

    /// Transform from user space into the target's pixel space for subsequent draws.
    fn set_transform(&mut self, target: DrawingHandle, transform: Affine) -> StrataResult<()>;

    /// Replace the clip of the target with the intersection of `clips`.
    fn set_clip(&mut self, target: DrawingHandle, clips: &[ClipPath]) -> StrataResult<()>;

    /// Fill a user-space path.
    fn fill_path(
        &mut self,
        target: DrawingHandle,
        path: &BezPath,
        rule: FillRule,
        paint: &BackendPaint,
    ) -> StrataResult<()>;

    /// Draw an image into its destination rectangle.
    fn draw_image(&mut self, target: DrawingHandle, image: &ImageData, opacity: f32)
    -> StrataResult<()>;

    /// Draw a positioned glyph run.
    fn fill_glyphs(&mut self, target: DrawingHandle, run: &GlyphRun) -> StrataResult<()>;

    /// Composite `src` onto the target at `offset` (target pixels) with `op` and constant
    /// `alpha`, limited by the target's clip.
    fn composite(
        &mut self,
        dst: DrawingHandle,
        src: SurfaceId,
        op: CompOp,
        alpha: f32,
        offset: (i32, i32),
    ) -> StrataResult<()>;

    /// Multiply `target` by the weights of an equally sized `mask` surface.
    fn apply_mask(&mut self, target: SurfaceId, mask: SurfaceId, mode: MaskMode)
    -> StrataResult<()>;

    /// Run a pixel pass over the whole surface.
    fn apply_filter(&mut self, surface: SurfaceId, pass: &PixelPass) -> StrataResult<()>;

    /// Copy out premultiplied RGBA8 pixels.
    fn read_pixels(&self, surface: SurfaceId) -> StrataResult<Vec<u8>>;

    /// Number of surfaces currently allocated.
    fn live_surfaces(&self) -> usize;
}

#[cfg(test)]
#[path = "../../tests/unit/render/backend.rs"]
mod tests;
