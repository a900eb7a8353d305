pub(crate) fn mul_div255_u16(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

pub(crate) fn mul_div255_u8(x: u16, y: u16) -> u8 {
    mul_div255_u16(x, y) as u8
}

/// Map a unit float to a u8 channel with round-half-away-from-zero.
pub(crate) fn unit_to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Rec. 709 luminance of a premultiplied pixel, as used for luminance masks.
pub(crate) fn luminance_u8(px: &[u8]) -> u8 {
    let r = u32::from(px[0]);
    let g = u32::from(px[1]);
    let b = u32::from(px[2]);
    ((r * 54 + g * 183 + b * 19 + 128) >> 8).min(255) as u8
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/math.rs"]
mod tests;
