use std::collections::HashMap;
use std::sync::Arc;

use crate::effects::composite::{CompOp, composite_region, over_in_place};
use crate::effects::filter::{PixelPass, apply_pixel_pass};
use crate::effects::mask::{MaskMode, mask_apply_in_place};
use crate::foundation::core::{Affine, BezPath};
use crate::foundation::error::{StrataError, StrataResult};
use crate::foundation::math::mul_div255_u8;
use crate::render::backend::{BackendPaint, ClipPath, DrawingBackend, DrawingHandle, SurfaceId};
use crate::render::surface_pool::{SurfaceDesc, SurfacePool, SurfacePoolOpts, SurfacePoolStats};
use crate::scene::document::{GlyphRun, ImageData};
use crate::scene::paint::FillRule;

/// Options for the CPU backend.
#[derive(Debug, Clone, Copy)]
pub struct CpuBackendOpts {
    pub(crate) pool: SurfacePoolOpts,
    pub(crate) max_surface_dim: u32,
    pub(crate) max_live_surfaces: Option<usize>,
    pub(crate) max_live_bytes: Option<usize>,
}

impl Default for CpuBackendOpts {
    fn default() -> Self {
        Self {
            pool: SurfacePoolOpts::default(),
            max_surface_dim: u32::from(u16::MAX),
            max_live_surfaces: None,
            max_live_bytes: None,
        }
    }
}

impl CpuBackendOpts {
    /// Return options with the given pixmap pool limits.
    pub fn with_pool(mut self, pool: SurfacePoolOpts) -> Self {
        self.pool = pool;
        self
    }

    /// Return options rejecting surfaces wider or taller than `dim` (capped at `u16::MAX`).
    pub fn with_max_surface_dim(mut self, dim: u32) -> Self {
        self.max_surface_dim = dim.min(u32::from(u16::MAX));
        self
    }

    /// Return options failing allocation once `max` surfaces are alive.
    pub fn with_max_live_surfaces(mut self, max: Option<usize>) -> Self {
        self.max_live_surfaces = max;
        self
    }

    /// Return options failing allocation once live surfaces would exceed `max` bytes.
    pub fn with_max_live_bytes(mut self, max: Option<usize>) -> Self {
        self.max_live_bytes = max;
        self
    }
}

struct CpuSurface {
    desc: SurfaceDesc,
    pixmap: vello_cpu::Pixmap,
    transform: Affine,
    // One coverage byte per pixel; `None` means unclipped.
    clip: Option<Vec<u8>>,
}

/// Software [`DrawingBackend`] rasterizing with `vello_cpu`.
///
/// Every draw renders into a pooled scratch pixmap which is then composited onto the target
/// through the target's clip coverage.
pub struct CpuBackend {
    opts: CpuBackendOpts,
    pool: SurfacePool,
    surfaces: HashMap<SurfaceId, CpuSurface>,
    next_id: u32,
    live_bytes: usize,
    ctx: Option<vello_cpu::RenderContext>,
    fonts: HashMap<(usize, u32), (Arc<Vec<u8>>, vello_cpu::peniko::FontData)>,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new(CpuBackendOpts::default())
    }
}

impl CpuBackend {
    /// Backend with the given options.
    pub fn new(opts: CpuBackendOpts) -> Self {
        Self {
            opts,
            pool: SurfacePool::new(opts.pool),
            surfaces: HashMap::new(),
            next_id: 0,
            live_bytes: 0,
            ctx: None,
            fonts: HashMap::new(),
        }
    }

    /// Options this backend was built with.
    pub fn opts(&self) -> CpuBackendOpts {
        self.opts
    }

    /// Pixmap pool counters.
    pub fn pool_stats(&self) -> SurfacePoolStats {
        self.pool.stats()
    }

    fn surface(&self, id: SurfaceId) -> StrataResult<&CpuSurface> {
        self.surfaces
            .get(&id)
            .ok_or_else(|| StrataError::backend(format!("unknown surface {}", id.0)))
    }

    fn surface_mut(&mut self, id: SurfaceId) -> StrataResult<&mut CpuSurface> {
        self.surfaces
            .get_mut(&id)
            .ok_or_else(|| StrataError::backend(format!("unknown surface {}", id.0)))
    }

    fn with_ctx_mut<R>(
        &mut self,
        width: u16,
        height: u16,
        f: impl FnOnce(&mut vello_cpu::RenderContext) -> StrataResult<R>,
    ) -> StrataResult<R> {
        let mut ctx = match self.ctx.take() {
            Some(ctx) if ctx.width() == width && ctx.height() == height => ctx,
            _ => vello_cpu::RenderContext::new(width, height),
        };
        ctx.reset();
        ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
        ctx.set_paint_transform(vello_cpu::kurbo::Affine::IDENTITY);
        ctx.set_fill_rule(vello_cpu::peniko::Fill::NonZero);
        let out = f(&mut ctx);
        self.ctx = Some(ctx);
        out
    }

    /// Rasterize into a fresh transparent scratch pixmap of the given size.
    fn render_scratch(
        &mut self,
        desc: SurfaceDesc,
        draw: impl FnOnce(&mut vello_cpu::RenderContext) -> StrataResult<()>,
    ) -> StrataResult<vello_cpu::Pixmap> {
        let mut scratch = self.pool.borrow(desc);
        let res = self.with_ctx_mut(desc.width, desc.height, |ctx| {
            draw(ctx)?;
            ctx.flush();
            ctx.render_to_pixmap(&mut scratch);
            Ok(())
        });
        match res {
            Ok(()) => Ok(scratch),
            Err(e) => {
                self.pool.release(desc, scratch);
                Err(e)
            }
        }
    }

    /// Source-over `scratch` onto `target` through its clip, then recycle the scratch.
    fn commit_scratch(
        &mut self,
        target: SurfaceId,
        scratch: vello_cpu::Pixmap,
    ) -> StrataResult<()> {
        let res = self.surface_mut(target).and_then(|s| {
            over_in_place(
                s.pixmap.data_as_u8_slice_mut(),
                scratch.data_as_u8_slice(),
                s.clip.as_deref(),
            )
        });
        let desc = SurfaceDesc {
            width: scratch.width(),
            height: scratch.height(),
        };
        self.pool.release(desc, scratch);
        res
    }

    fn font_for(&mut self, run: &GlyphRun) -> vello_cpu::peniko::FontData {
        let key = (Arc::as_ptr(&run.font) as usize, run.font_index);
        if let Some((_, font)) = self.fonts.get(&key) {
            return font.clone();
        }
        let font = vello_cpu::peniko::FontData::new(
            vello_cpu::peniko::Blob::from(run.font.as_ref().clone()),
            run.font_index,
        );
        // The Arc is kept alive so its address cannot be reused by another font.
        self.fonts.insert(key, (Arc::clone(&run.font), font.clone()));
        font
    }
}

impl DrawingBackend for CpuBackend {
    fn create_surface(&mut self, width: u32, height: u32) -> StrataResult<SurfaceId> {
        if width == 0 || height == 0 {
            return Err(StrataError::allocation(format!(
                "zero-sized surface {width}x{height}"
            )));
        }
        let limit = self.opts.max_surface_dim;
        if width > limit || height > limit {
            return Err(StrataError::allocation(format!(
                "surface {width}x{height} exceeds the {limit}px limit"
            )));
        }
        if let Some(max) = self.opts.max_live_surfaces
            && self.surfaces.len() >= max
        {
            return Err(StrataError::allocation(format!(
                "live surface limit of {max} reached"
            )));
        }
        let desc = SurfaceDesc::new(width, height)?;
        if let Some(max) = self.opts.max_live_bytes
            && self.live_bytes.saturating_add(desc.byte_len()) > max
        {
            return Err(StrataError::allocation(format!(
                "live surface bytes would exceed {max}"
            )));
        }

        let id = SurfaceId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        let pixmap = self.pool.borrow(desc);
        self.live_bytes = self.live_bytes.saturating_add(desc.byte_len());
        self.surfaces.insert(
            id,
            CpuSurface {
                desc,
                pixmap,
                transform: Affine::IDENTITY,
                clip: None,
            },
        );
        tracing::trace!(surface = id.0, width, height, "allocated cpu surface");
        Ok(id)
    }

    fn release_surface(&mut self, surface: SurfaceId) {
        if let Some(s) = self.surfaces.remove(&surface) {
            self.live_bytes = self.live_bytes.saturating_sub(s.desc.byte_len());
            self.pool.release(s.desc, s.pixmap);
            tracing::trace!(surface = surface.0, "released cpu surface");
        }
    }

    fn surface_size(&self, surface: SurfaceId) -> StrataResult<(u32, u32)> {
        let s = self.surface(surface)?;
        Ok((u32::from(s.desc.width), u32::from(s.desc.height)))
    }

    fn bind_target(&mut self, surface: SurfaceId) -> StrataResult<DrawingHandle> {
        let s = self.surface_mut(surface)?;
        s.transform = Affine::IDENTITY;
        s.clip = None;
        Ok(DrawingHandle::new(surface))
    }

    fn set_transform(&mut self, target: DrawingHandle, transform: Affine) -> StrataResult<()> {
        self.surface_mut(target.surface())?.transform = transform;
        Ok(())
    }

    fn set_clip(&mut self, target: DrawingHandle, clips: &[ClipPath]) -> StrataResult<()> {
        let desc = self.surface(target.surface())?.desc;
        if clips.is_empty() {
            self.surface_mut(target.surface())?.clip = None;
            return Ok(());
        }

        let mut coverage = vec![255u8; (desc.width as usize) * (desc.height as usize)];
        for clip in clips {
            let path = bezpath_to_cpu(&clip.path);
            let rule = fill_rule_to_cpu(clip.rule);
            let scratch = self.render_scratch(desc, |ctx| {
                ctx.set_fill_rule(rule);
                ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(255, 255, 255, 255));
                ctx.fill_path(&path);
                Ok(())
            })?;
            for (c, px) in coverage
                .iter_mut()
                .zip(scratch.data_as_u8_slice().chunks_exact(4))
            {
                *c = mul_div255_u8(u16::from(*c), u16::from(px[3]));
            }
            self.pool.release(desc, scratch);
        }
        self.surface_mut(target.surface())?.clip = Some(coverage);
        Ok(())
    }

    fn fill_path(
        &mut self,
        target: DrawingHandle,
        path: &BezPath,
        rule: FillRule,
        paint: &BackendPaint,
    ) -> StrataResult<()> {
        let (desc, transform) = {
            let s = self.surface(target.surface())?;
            (s.desc, s.transform)
        };
        let cpu_path = bezpath_to_cpu(path);
        let fill = fill_rule_to_cpu(rule);

        match *paint {
            BackendPaint::Solid(c) => {
                if c.a == 0 {
                    return Ok(());
                }
                let scratch = self.render_scratch(desc, |ctx| {
                    ctx.set_transform(affine_to_cpu(transform));
                    ctx.set_fill_rule(fill);
                    ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(c.r, c.g, c.b, c.a));
                    ctx.fill_path(&cpu_path);
                    Ok(())
                })?;
                self.commit_scratch(target.surface(), scratch)
            }
            BackendPaint::Tile {
                surface,
                origin,
                opacity,
            } => {
                let mut scratch = self.render_scratch(desc, |ctx| {
                    ctx.set_transform(affine_to_cpu(transform));
                    ctx.set_fill_rule(fill);
                    ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(255, 255, 255, 255));
                    ctx.fill_path(&cpu_path);
                    Ok(())
                })?;
                let tiled = match self.surfaces.get(&surface) {
                    Some(tile) => {
                        fill_tiled(
                            scratch.data_as_u8_slice_mut(),
                            desc,
                            tile.pixmap.data_as_u8_slice(),
                            tile.desc,
                            origin,
                            opacity,
                        );
                        Ok(())
                    }
                    None => Err(StrataError::backend(format!(
                        "unknown tile surface {}",
                        surface.0
                    ))),
                };
                if let Err(e) = tiled {
                    self.pool.release(desc, scratch);
                    return Err(e);
                }
                self.commit_scratch(target.surface(), scratch)
            }
        }
    }

    fn draw_image(
        &mut self,
        target: DrawingHandle,
        image: &ImageData,
        opacity: f32,
    ) -> StrataResult<()> {
        let (desc, transform) = {
            let s = self.surface(target.surface())?;
            (s.desc, s.transform)
        };
        let opacity = opacity.clamp(0.0, 1.0);
        if opacity <= 0.0 || image.dest.width() <= 0.0 || image.dest.height() <= 0.0 {
            return Ok(());
        }
        let paint = rgba_premul_to_image(&image.pixels, image.width, image.height)?;
        let (w, h) = (f64::from(image.width), f64::from(image.height));
        let tr = transform
            * Affine::translate((image.dest.x0, image.dest.y0))
            * Affine::scale_non_uniform(image.dest.width() / w, image.dest.height() / h);

        let scratch = self.render_scratch(desc, |ctx| {
            ctx.set_transform(affine_to_cpu(tr));
            ctx.set_paint(paint);
            if opacity < 1.0 {
                ctx.push_opacity_layer(opacity);
            }
            ctx.fill_rect(&vello_cpu::kurbo::Rect::new(0.0, 0.0, w, h));
            if opacity < 1.0 {
                ctx.pop_layer();
            }
            Ok(())
        })?;
        self.commit_scratch(target.surface(), scratch)
    }

    fn fill_glyphs(&mut self, target: DrawingHandle, run: &GlyphRun) -> StrataResult<()> {
        let (desc, transform) = {
            let s = self.surface(target.surface())?;
            (s.desc, s.transform)
        };
        if run.glyphs.is_empty() || run.color.a == 0 {
            return Ok(());
        }
        let font = self.font_for(run);
        let c = run.color;

        let scratch = self.render_scratch(desc, |ctx| {
            ctx.set_transform(affine_to_cpu(transform));
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(c.r, c.g, c.b, c.a));
            let glyphs = run.glyphs.iter().map(|g| vello_cpu::Glyph {
                id: g.id,
                x: g.x,
                y: g.y,
            });
            ctx.glyph_run(&font)
                .font_size(run.font_size)
                .fill_glyphs(glyphs);
            Ok(())
        })?;
        self.commit_scratch(target.surface(), scratch)
    }

    fn composite(
        &mut self,
        dst: DrawingHandle,
        src: SurfaceId,
        op: CompOp,
        alpha: f32,
        offset: (i32, i32),
    ) -> StrataResult<()> {
        if dst.surface() == src {
            return Err(StrataError::backend("cannot composite a surface onto itself"));
        }
        let src_surface = self
            .surfaces
            .remove(&src)
            .ok_or_else(|| StrataError::backend(format!("unknown source surface {}", src.0)))?;
        let res = self.surface_mut(dst.surface()).and_then(|d| {
            composite_region(
                d.pixmap.data_as_u8_slice_mut(),
                (u32::from(d.desc.width), u32::from(d.desc.height)),
                src_surface.pixmap.data_as_u8_slice(),
                (
                    u32::from(src_surface.desc.width),
                    u32::from(src_surface.desc.height),
                ),
                offset,
                op,
                alpha,
                d.clip.as_deref(),
            )
        });
        self.surfaces.insert(src, src_surface);
        res
    }

    fn apply_mask(
        &mut self,
        target: SurfaceId,
        mask: SurfaceId,
        mode: MaskMode,
    ) -> StrataResult<()> {
        if target == mask {
            return Err(StrataError::backend("cannot mask a surface with itself"));
        }
        let mask_surface = self
            .surfaces
            .remove(&mask)
            .ok_or_else(|| StrataError::backend(format!("unknown mask surface {}", mask.0)))?;
        let res = self.surface_mut(target).and_then(|t| {
            if t.desc != mask_surface.desc {
                return Err(StrataError::backend(format!(
                    "mask is {}x{}, target is {}x{}",
                    mask_surface.desc.width, mask_surface.desc.height, t.desc.width, t.desc.height
                )));
            }
            mask_apply_in_place(
                t.pixmap.data_as_u8_slice_mut(),
                mask_surface.pixmap.data_as_u8_slice(),
                mode,
            )
        });
        self.surfaces.insert(mask, mask_surface);
        res
    }

    fn apply_filter(&mut self, surface: SurfaceId, pass: &PixelPass) -> StrataResult<()> {
        let s = self.surface_mut(surface)?;
        let (w, h) = (u32::from(s.desc.width), u32::from(s.desc.height));
        apply_pixel_pass(s.pixmap.data_as_u8_slice_mut(), w, h, pass)
    }

    fn read_pixels(&self, surface: SurfaceId) -> StrataResult<Vec<u8>> {
        Ok(self.surface(surface)?.pixmap.data_as_u8_slice().to_vec())
    }

    fn live_surfaces(&self) -> usize {
        self.surfaces.len()
    }
}

/// Replace the white coverage in `dst` with the tile content repeated from `origin`.
fn fill_tiled(
    dst: &mut [u8],
    dst_desc: SurfaceDesc,
    tile: &[u8],
    tile_desc: SurfaceDesc,
    origin: (i32, i32),
    opacity: f32,
) {
    let (dw, dh) = (i32::from(dst_desc.width), i32::from(dst_desc.height));
    let (tw, th) = (i32::from(tile_desc.width), i32::from(tile_desc.height));
    let op = u16::from(crate::foundation::math::unit_to_u8(opacity));
    for y in 0..dh {
        let ty = (y - origin.1).rem_euclid(th);
        for x in 0..dw {
            let di = ((y * dw + x) as usize) * 4;
            let cov = dst[di + 3];
            if cov == 0 {
                continue;
            }
            let tx = (x - origin.0).rem_euclid(tw);
            let ti = ((ty * tw + tx) as usize) * 4;
            let w = u16::from(mul_div255_u8(u16::from(cov), op));
            for c in 0..4 {
                dst[di + c] = mul_div255_u8(u16::from(tile[ti + c]), w);
            }
        }
    }
}

fn affine_to_cpu(a: Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

fn fill_rule_to_cpu(rule: FillRule) -> vello_cpu::peniko::Fill {
    match rule {
        FillRule::NonZero => vello_cpu::peniko::Fill::NonZero,
        FillRule::EvenOdd => vello_cpu::peniko::Fill::EvenOdd,
    }
}

fn bezpath_to_cpu(path: &BezPath) -> vello_cpu::kurbo::BezPath {
    use kurbo::PathEl;

    let pt = |p: kurbo::Point| vello_cpu::kurbo::Point::new(p.x, p.y);
    let mut out = vello_cpu::kurbo::BezPath::new();
    for &el in path.elements() {
        match el {
            PathEl::MoveTo(p) => out.move_to(pt(p)),
            PathEl::LineTo(p) => out.line_to(pt(p)),
            PathEl::QuadTo(p1, p2) => out.quad_to(pt(p1), pt(p2)),
            PathEl::CurveTo(p1, p2, p3) => out.curve_to(pt(p1), pt(p2), pt(p3)),
            PathEl::ClosePath => out.close_path(),
        }
    }
    out
}

fn rgba_premul_to_image(bytes: &[u8], width: u32, height: u32) -> StrataResult<vello_cpu::Image> {
    use vello_cpu::peniko::color::PremulRgba8;
    let desc = SurfaceDesc::new(width, height)?;
    if bytes.len() != desc.byte_len() {
        return Err(StrataError::validation("image byte length mismatch"));
    }
    let pixels: Vec<PremulRgba8> = bytes
        .chunks_exact(4)
        .map(|px| PremulRgba8::from_u8_array([px[0], px[1], px[2], px[3]]))
        .collect();
    let pixmap = vello_cpu::Pixmap::from_parts_with_opacity(pixels, desc.width, desc.height, true);
    Ok(vello_cpu::Image {
        image: vello_cpu::ImageSource::Pixmap(Arc::new(pixmap)),
        sampler: vello_cpu::peniko::ImageSampler::default(),
    })
}

#[cfg(test)]
#[path = "../../tests/unit/render/cpu.rs"]
mod tests;
