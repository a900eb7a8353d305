use crate::foundation::error::{StrataError, StrataResult};
use crate::foundation::math::{luminance_u8, mul_div255_u8};

/// Which channel of the mask content drives the mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskMode {
    /// Luminance of the premultiplied mask color.
    #[default]
    Luminance,
    /// Mask alpha.
    Alpha,
}

/// Multiply every pixel of `target` by the corresponding mask weight.
pub fn mask_apply_in_place(target: &mut [u8], mask: &[u8], mode: MaskMode) -> StrataResult<()> {
    if target.len() != mask.len() || !target.len().is_multiple_of(4) {
        return Err(StrataError::backend(
            "mask_apply_in_place expects equal-length rgba8 buffers",
        ));
    }
    for (t, m) in target.chunks_exact_mut(4).zip(mask.chunks_exact(4)) {
        let w = match mode {
            MaskMode::Alpha => m[3],
            MaskMode::Luminance => luminance_u8(m),
        };
        if w == 255 {
            continue;
        }
        let w16 = u16::from(w);
        for c in t.iter_mut() {
            *c = mul_div255_u8(u16::from(*c), w16);
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/effects/mask.rs"]
mod tests;
