use super::*;

const RED: PremulRgba8 = [255, 0, 0, 255];
const WHITE: PremulRgba8 = [255, 255, 255, 255];
const CLEAR: PremulRgba8 = [0, 0, 0, 0];

#[test]
fn half_opacity_red_over_white() {
    assert_eq!(composite_px(WHITE, RED, CompOp::SrcOver, 0.5), [255, 128, 128, 255]);
}

#[test]
fn zero_alpha_source_over_is_identity() {
    assert_eq!(composite_px(WHITE, RED, CompOp::SrcOver, 0.0), WHITE);
}

#[test]
fn porter_duff_operators_on_opaque_pixels() {
    assert_eq!(composite_px(WHITE, RED, CompOp::Clear, 1.0), CLEAR);
    assert_eq!(composite_px(WHITE, RED, CompOp::Src, 1.0), RED);
    assert_eq!(composite_px(WHITE, RED, CompOp::Dst, 1.0), WHITE);
    assert_eq!(composite_px(WHITE, RED, CompOp::DstOver, 1.0), WHITE);
    assert_eq!(composite_px(WHITE, RED, CompOp::SrcIn, 1.0), RED);
    assert_eq!(composite_px(WHITE, RED, CompOp::SrcOut, 1.0), CLEAR);
    assert_eq!(composite_px(WHITE, RED, CompOp::Xor, 1.0), CLEAR);
    assert_eq!(composite_px(CLEAR, RED, CompOp::SrcAtop, 1.0), CLEAR);
    assert_eq!(composite_px(CLEAR, RED, CompOp::DstAtop, 1.0), RED);
}

#[test]
fn plus_saturates() {
    let half = [128, 0, 0, 128];
    assert_eq!(composite_px(half, half, CompOp::Plus, 1.0), [255, 0, 0, 255]);
}

#[test]
fn multiply_on_opaque_is_channel_product() {
    let grey = [128, 128, 128, 255];
    assert_eq!(composite_px(grey, RED, CompOp::Multiply, 1.0), [128, 0, 0, 255]);
    assert_eq!(composite_px(WHITE, RED, CompOp::Screen, 1.0), WHITE);
    assert_eq!(composite_px(WHITE, RED, CompOp::Difference, 1.0), [0, 255, 255, 255]);
}

#[test]
fn blend_mode_over_transparent_is_source() {
    assert_eq!(composite_px(CLEAR, RED, CompOp::Darken, 1.0), RED);
}

#[test]
fn operators_round_trip_through_kebab_case() {
    let op: CompOp = serde_json::from_str("\"color-dodge\"").unwrap();
    assert_eq!(op, CompOp::ColorDodge);
    assert_eq!(serde_json::to_string(&CompOp::SrcOver).unwrap(), "\"src-over\"");
}

#[test]
fn region_composite_respects_offset_and_bounds() {
    let mut dst = vec![0u8; 4 * 4 * 4];
    let src = RED.repeat(2 * 2);
    composite_region(&mut dst, (4, 4), &src, (2, 2), (3, 3), CompOp::SrcOver, 1.0, None).unwrap();

    let px = |x: usize, y: usize| &dst[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
    assert_eq!(px(3, 3), &RED);
    assert_eq!(px(2, 3), &CLEAR);
    assert_eq!(px(3, 2), &CLEAR);
}

#[test]
fn region_composite_honors_coverage() {
    let mut dst = WHITE.repeat(2);
    let src = RED.repeat(2);
    let cov = [255u8, 0];
    composite_region(&mut dst, (2, 1), &src, (2, 1), (0, 0), CompOp::SrcOver, 1.0, Some(&cov))
        .unwrap();
    assert_eq!(&dst[..4], &RED);
    assert_eq!(&dst[4..], &WHITE);
}

#[test]
fn region_composite_rejects_bad_buffers() {
    let mut dst = vec![0u8; 15];
    let src = vec![0u8; 16];
    assert!(
        composite_region(&mut dst, (2, 2), &src, (2, 2), (0, 0), CompOp::SrcOver, 1.0, None)
            .is_err()
    );
}

#[test]
fn over_in_place_opaque_source_replaces() {
    let mut dst = WHITE.to_vec();
    over_in_place(&mut dst, &RED, None).unwrap();
    assert_eq!(dst, RED.to_vec());
}
