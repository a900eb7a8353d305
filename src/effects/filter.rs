use smallvec::SmallVec;

use crate::effects::composite::CompOp;
use crate::foundation::core::{Color, Rgba8Premul};
use crate::foundation::error::{StrataError, StrataResult};
use crate::scene::NodeId;

/// Ordered filter chain. Each primitive transforms the working image in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    /// Primitives in execution order.
    pub primitives: SmallVec<[FilterPrimitive; 4]>,
}

impl Filter {
    /// Chain from primitives.
    pub fn new(primitives: impl IntoIterator<Item = FilterPrimitive>) -> Self {
        Self {
            primitives: primitives.into_iter().collect(),
        }
    }
}

/// Single filter step, with parameters in the user space of the filtered element.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterPrimitive {
    /// Gaussian blur.
    GaussianBlur {
        /// Standard deviation in user units.
        std_dev: f32,
    },
    /// Translate the working image.
    Offset {
        /// Horizontal shift in user units.
        dx: f64,
        /// Vertical shift in user units.
        dy: f64,
    },
    /// 4x5 color matrix on straight-alpha channels (row-major, last column is the bias).
    ColorMatrix {
        /// Matrix coefficients.
        matrix: [f32; 20],
    },
    /// Replace the working image with a solid color.
    Flood {
        /// Flood color.
        color: Color,
    },
    /// Replace the working image with the rendering of another node.
    Image {
        /// Node rendered as the input.
        node: NodeId,
    },
    /// Composite the unfiltered source graphic onto the working image.
    MergeSource {
        /// Operator with the source graphic as source.
        op: CompOp,
    },
}

/// Filter step expressed in device pixels, executable without any scene knowledge.
#[derive(Clone, Debug, PartialEq)]
pub enum PixelPass {
    /// Separable gaussian blur.
    Blur {
        /// Kernel radius in pixels.
        radius: u32,
        /// Standard deviation in pixels.
        sigma: f32,
    },
    /// Integer translation; uncovered pixels become transparent.
    Offset {
        /// Horizontal shift.
        dx: i32,
        /// Vertical shift.
        dy: i32,
    },
    /// Color matrix.
    ColorMatrix([f32; 20]),
    /// Fill with a premultiplied color.
    Flood(Rgba8Premul),
}

impl PixelPass {
    /// Blur pass for a device-space standard deviation (radius is `ceil(3 * sigma)`).
    pub fn blur(sigma: f32) -> Self {
        let sigma = if sigma.is_finite() { sigma.max(0.0) } else { 0.0 };
        Self::Blur {
            radius: (sigma * 3.0).ceil() as u32,
            sigma,
        }
    }
}

/// Run `pass` over a tightly packed premultiplied buffer.
pub fn apply_pixel_pass(
    pixels: &mut [u8],
    width: u32,
    height: u32,
    pass: &PixelPass,
) -> StrataResult<()> {
    if pixels.len() != (width as usize) * (height as usize) * 4 {
        return Err(StrataError::backend("pixel pass expects a tightly packed rgba8 buffer"));
    }
    match pass {
        PixelPass::Blur { radius, sigma } => {
            let kernel = gaussian_kernel_q16(*radius, *sigma)?;
            if kernel.len() == 1 {
                return Ok(());
            }
            let src = pixels.to_vec();
            let mut tmp = vec![0u8; pixels.len()];
            horizontal_blur_q16(&src, &mut tmp, width, height, &kernel);
            vertical_blur_q16(&tmp, pixels, width, height, &kernel);
        }
        PixelPass::Offset { dx, dy } => offset_rgba8(pixels, width, height, *dx, *dy),
        PixelPass::ColorMatrix(m) => color_matrix_rgba8_premul(pixels, *m),
        PixelPass::Flood(color) => {
            let rgba = color.to_array();
            for px in pixels.chunks_exact_mut(4) {
                px.copy_from_slice(&rgba);
            }
        }
    }
    Ok(())
}

fn gaussian_kernel_q16(radius: u32, sigma: f32) -> StrataResult<Vec<u32>> {
    if radius == 0 {
        return Ok(vec![1 << 16]);
    }
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(StrataError::validation("blur sigma must be finite and > 0"));
    }

    let r = radius as i32;
    let sigma = f64::from(sigma);
    let denom = 2.0 * sigma * sigma;
    let weights_f: Vec<f64> = (-r..=r)
        .map(|i| {
            let x = f64::from(i);
            (-x * x / denom).exp()
        })
        .collect();
    let sum: f64 = weights_f.iter().sum();
    if sum <= 0.0 {
        return Err(StrataError::backend("gaussian kernel sum is zero"));
    }

    let mut weights: Vec<u32> = weights_f
        .iter()
        .map(|wf| ((wf / sum) * 65536.0).round().clamp(0.0, 65536.0) as u32)
        .collect();
    let acc: i64 = weights.iter().map(|&w| i64::from(w)).sum();
    let delta = 65536 - acc;
    if delta != 0 {
        let mid = weights.len() / 2;
        weights[mid] = (i64::from(weights[mid]) + delta).clamp(0, 65536) as u32;
    }
    Ok(weights)
}

fn horizontal_blur_q16(src: &[u8], dst: &mut [u8], width: u32, height: u32, k: &[u32]) {
    let radius = (k.len() / 2) as i32;
    let w = width as i32;
    for y in 0..height as i32 {
        for x in 0..w {
            let mut acc = [0u64; 4];
            for (ki, &kw) in k.iter().enumerate() {
                let sx = x + ki as i32 - radius;
                // Outside the surface is transparent black.
                if sx < 0 || sx >= w {
                    continue;
                }
                let idx = ((y * w + sx) as usize) * 4;
                for c in 0..4 {
                    acc[c] += u64::from(kw) * u64::from(src[idx + c]);
                }
            }
            let out_idx = ((y * w + x) as usize) * 4;
            for c in 0..4 {
                dst[out_idx + c] = q16_to_u8(acc[c]);
            }
        }
    }
}

fn vertical_blur_q16(src: &[u8], dst: &mut [u8], width: u32, height: u32, k: &[u32]) {
    let radius = (k.len() / 2) as i32;
    let w = width as i32;
    let h = height as i32;
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0u64; 4];
            for (ki, &kw) in k.iter().enumerate() {
                let sy = y + ki as i32 - radius;
                if sy < 0 || sy >= h {
                    continue;
                }
                let idx = ((sy * w + x) as usize) * 4;
                for c in 0..4 {
                    acc[c] += u64::from(kw) * u64::from(src[idx + c]);
                }
            }
            let out_idx = ((y * w + x) as usize) * 4;
            for c in 0..4 {
                dst[out_idx + c] = q16_to_u8(acc[c]);
            }
        }
    }
}

fn q16_to_u8(acc: u64) -> u8 {
    ((acc + 32768) >> 16).min(255) as u8
}

fn offset_rgba8(pixels: &mut [u8], width: u32, height: u32, dx: i32, dy: i32) {
    if dx == 0 && dy == 0 {
        return;
    }
    let src = pixels.to_vec();
    pixels.fill(0);
    let (w, h) = (width as i32, height as i32);
    for y in 0..h {
        let sy = y - dy;
        if sy < 0 || sy >= h {
            continue;
        }
        for x in 0..w {
            let sx = x - dx;
            if sx < 0 || sx >= w {
                continue;
            }
            let di = ((y * w + x) as usize) * 4;
            let si = ((sy * w + sx) as usize) * 4;
            pixels[di..di + 4].copy_from_slice(&src[si..si + 4]);
        }
    }
}

fn color_matrix_rgba8_premul(pixels: &mut [u8], m: [f32; 20]) {
    for px in pixels.chunks_exact_mut(4) {
        let pa = f32::from(px[3]) / 255.0;
        let inv_a = if pa > 0.0 { 1.0 / pa } else { 0.0 };
        let r = f32::from(px[0]) / 255.0 * inv_a;
        let g = f32::from(px[1]) / 255.0 * inv_a;
        let b = f32::from(px[2]) / 255.0 * inv_a;
        let a = pa;

        let row = |i: usize| {
            (m[i] * r + m[i + 1] * g + m[i + 2] * b + m[i + 3] * a + m[i + 4]).clamp(0.0, 1.0)
        };
        let (out_r, out_g, out_b, out_a) = (row(0), row(5), row(10), row(15));

        px[0] = (out_r * out_a * 255.0).round().clamp(0.0, 255.0) as u8;
        px[1] = (out_g * out_a * 255.0).round().clamp(0.0, 255.0) as u8;
        px[2] = (out_b * out_a * 255.0).round().clamp(0.0, 255.0) as u8;
        px[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/effects/filter.rs"]
mod tests;
