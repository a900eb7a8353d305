use crate::foundation::core::PixelRect;
use crate::foundation::error::{StrataError, StrataResult};
use crate::foundation::math::{mul_div255_u8, unit_to_u8};

/// One premultiplied RGBA8 pixel.
pub type PremulRgba8 = [u8; 4];

/// Compositing operator applied when a layer is merged into its backdrop.
///
/// Porter-Duff operators work on premultiplied channels; the remaining ones are separable blend
/// modes composited with source-over.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompOp {
    /// `clear`
    Clear,
    /// `src`
    Src,
    /// `dst`
    Dst,
    /// `src-over`
    #[default]
    SrcOver,
    /// `dst-over`
    DstOver,
    /// `src-in`
    SrcIn,
    /// `dst-in`
    DstIn,
    /// `src-out`
    SrcOut,
    /// `dst-out`
    DstOut,
    /// `src-atop`
    SrcAtop,
    /// `dst-atop`
    DstAtop,
    /// `xor`
    Xor,
    /// `plus`
    Plus,
    /// `multiply`
    Multiply,
    /// `screen`
    Screen,
    /// `overlay`
    Overlay,
    /// `darken`
    Darken,
    /// `lighten`
    Lighten,
    /// `color-dodge`
    ColorDodge,
    /// `color-burn`
    ColorBurn,
    /// `hard-light`
    HardLight,
    /// `soft-light`
    SoftLight,
    /// `difference`
    Difference,
    /// `exclusion`
    Exclusion,
}

impl CompOp {
    /// Porter-Duff weights `(fa, fb)` for source and destination, given both alphas.
    fn porter_duff(self, sa: f32, da: f32) -> Option<(f32, f32)> {
        Some(match self {
            Self::Clear => (0.0, 0.0),
            Self::Src => (1.0, 0.0),
            Self::Dst => (0.0, 1.0),
            Self::SrcOver => (1.0, 1.0 - sa),
            Self::DstOver => (1.0 - da, 1.0),
            Self::SrcIn => (da, 0.0),
            Self::DstIn => (0.0, sa),
            Self::SrcOut => (1.0 - da, 0.0),
            Self::DstOut => (0.0, 1.0 - sa),
            Self::SrcAtop => (da, 1.0 - sa),
            Self::DstAtop => (1.0 - da, sa),
            Self::Xor => (1.0 - da, 1.0 - sa),
            Self::Plus => (1.0, 1.0),
            _ => return None,
        })
    }

    fn blend(self, s: f32, d: f32) -> f32 {
        match self {
            Self::Multiply => s * d,
            Self::Screen => s + d - s * d,
            Self::Overlay => hard_light(d, s),
            Self::Darken => s.min(d),
            Self::Lighten => s.max(d),
            Self::ColorDodge => {
                if d <= 0.0 {
                    0.0
                } else if s >= 1.0 {
                    1.0
                } else {
                    (d / (1.0 - s)).min(1.0)
                }
            }
            Self::ColorBurn => {
                if d >= 1.0 {
                    1.0
                } else if s <= 0.0 {
                    0.0
                } else {
                    1.0 - ((1.0 - d) / s).min(1.0)
                }
            }
            Self::HardLight => hard_light(s, d),
            Self::SoftLight => {
                if s <= 0.5 {
                    d - (1.0 - 2.0 * s) * d * (1.0 - d)
                } else {
                    let g = if d <= 0.25 {
                        ((16.0 * d - 12.0) * d + 4.0) * d
                    } else {
                        d.sqrt()
                    };
                    d + (2.0 * s - 1.0) * (g - d)
                }
            }
            Self::Difference => (s - d).abs(),
            Self::Exclusion => s + d - 2.0 * s * d,
            _ => s,
        }
    }

    /// Return `true` for operators that leave the destination untouched where the source is
    /// transparent.
    pub fn is_bounded(self) -> bool {
        !matches!(
            self,
            Self::Clear | Self::Src | Self::SrcIn | Self::DstIn | Self::SrcOut | Self::DstAtop
        )
    }
}

fn hard_light(s: f32, d: f32) -> f32 {
    if s <= 0.5 {
        2.0 * s * d
    } else {
        let s2 = 2.0 * s - 1.0;
        s2 + d - s2 * d
    }
}

fn unpremul(p: f32, a: f32) -> f32 {
    if a > 0.0 { (p / a).clamp(0.0, 1.0) } else { 0.0 }
}

/// Composite one premultiplied pixel onto another with `op`, the source scaled by `alpha`.
pub fn composite_px(dst: PremulRgba8, src: PremulRgba8, op: CompOp, alpha: f32) -> PremulRgba8 {
    let alpha = if alpha.is_finite() { alpha.clamp(0.0, 1.0) } else { 0.0 };
    let s = src.map(|c| f32::from(c) / 255.0 * alpha);
    let d = dst.map(|c| f32::from(c) / 255.0);
    let (sa, da) = (s[3], d[3]);

    let out = if let Some((fa, fb)) = op.porter_duff(sa, da) {
        let mut out = [0.0f32; 4];
        for i in 0..4 {
            out[i] = s[i] * fa + d[i] * fb;
        }
        out
    } else {
        let out_a = sa + da * (1.0 - sa);
        let mut out = [0.0f32; 4];
        for i in 0..3 {
            let b = op.blend(unpremul(s[i], sa), unpremul(d[i], da)).clamp(0.0, 1.0);
            out[i] = s[i] * (1.0 - da) + d[i] * (1.0 - sa) + b * sa * da;
        }
        out[3] = out_a;
        out
    };

    let a = unit_to_u8(out[3]);
    let mut px = out.map(unit_to_u8);
    // Keep the premultiplied invariant c <= a after rounding.
    for c in &mut px[..3] {
        *c = (*c).min(a);
    }
    px[3] = a;
    px
}

/// Composite `src` (placed at `offset` in `dst` pixels) onto `dst`.
///
/// Only the overlap of both buffers is touched. When `coverage` is given it holds one byte per
/// destination pixel and linearly limits the effect of the operator.
#[allow(clippy::too_many_arguments)]
pub fn composite_region(
    dst: &mut [u8],
    dst_size: (u32, u32),
    src: &[u8],
    src_size: (u32, u32),
    offset: (i32, i32),
    op: CompOp,
    alpha: f32,
    coverage: Option<&[u8]>,
) -> StrataResult<()> {
    let (dw, dh) = dst_size;
    let (sw, sh) = src_size;
    let packed = |w: u32, h: u32| (w as usize) * (h as usize) * 4;
    if dst.len() != packed(dw, dh) || src.len() != packed(sw, sh) {
        return Err(StrataError::backend(
            "composite_region expects tightly packed rgba8 buffers",
        ));
    }
    if let Some(cov) = coverage
        && cov.len() != (dw as usize) * (dh as usize)
    {
        return Err(StrataError::backend("coverage length does not match destination"));
    }
    if op == CompOp::Dst {
        return Ok(());
    }

    let dst_rect = PixelRect::from_size(dw, dh);
    let src_rect = PixelRect {
        x: offset.0,
        y: offset.1,
        width: sw,
        height: sh,
    };
    let overlap = dst_rect.intersect(src_rect);
    if overlap.is_empty() {
        return Ok(());
    }

    for y in overlap.y..overlap.bottom() {
        let sy = (y - offset.1) as usize;
        for x in overlap.x..overlap.right() {
            let sx = (x - offset.0) as usize;
            let di = (y as usize * dw as usize + x as usize) * 4;
            let si = (sy * sw as usize + sx) * 4;
            let cov = coverage.map_or(255, |c| c[y as usize * dw as usize + x as usize]);
            if cov == 0 {
                continue;
            }
            let d = [dst[di], dst[di + 1], dst[di + 2], dst[di + 3]];
            let s = [src[si], src[si + 1], src[si + 2], src[si + 3]];
            let out = composite_px(d, s, op, alpha);
            let out = if cov == 255 { out } else { lerp_px(d, out, cov) };
            dst[di..di + 4].copy_from_slice(&out);
        }
    }
    Ok(())
}

/// Plain source-over of equal-sized premultiplied buffers, limited by optional coverage.
pub fn over_in_place(dst: &mut [u8], src: &[u8], coverage: Option<&[u8]>) -> StrataResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(StrataError::backend(
            "over_in_place expects equal-length rgba8 buffers",
        ));
    }
    for (i, (d, s)) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)).enumerate() {
        if s[3] == 0 {
            continue;
        }
        let cov = coverage.map_or(255u16, |c| u16::from(c[i]));
        let sa = mul_div255_u8(u16::from(s[3]), cov);
        let inv = 255u16 - u16::from(sa);
        for c in 0..4 {
            let sc = mul_div255_u8(u16::from(s[c]), cov);
            d[c] = sc.saturating_add(mul_div255_u8(u16::from(d[c]), inv));
        }
    }
    Ok(())
}

fn lerp_px(from: PremulRgba8, to: PremulRgba8, t: u8) -> PremulRgba8 {
    let t = u16::from(t);
    let it = 255 - t;
    let mut out = [0u8; 4];
    for i in 0..4 {
        let keep = mul_div255_u8(u16::from(from[i]), it);
        out[i] = keep.saturating_add(mul_div255_u8(u16::from(to[i]), t));
    }
    out
}

#[cfg(test)]
#[path = "../../tests/unit/effects/composite.rs"]
mod tests;
