use super::*;

fn desc(w: u32, h: u32) -> SurfaceDesc {
    SurfaceDesc::new(w, h).unwrap()
}

#[test]
fn pool_honors_bucket_cap() {
    let mut p = SurfacePool::new(SurfacePoolOpts {
        max_pool_bytes: 1 << 30,
        max_surfaces_per_bucket: 1,
    });
    let d = desc(8, 8);

    let a = p.borrow(d);
    let b = p.borrow(d);
    p.release(d, a);
    p.release(d, b);

    let st = p.stats();
    assert_eq!(st.retained_surfaces, 1);
    assert_eq!(st.dropped_on_release, 1);
}

#[test]
fn pool_honors_global_byte_cap() {
    let bytes_8x8 = desc(8, 8).byte_len();
    let mut p = SurfacePool::new(SurfacePoolOpts {
        max_pool_bytes: bytes_8x8,
        max_surfaces_per_bucket: 8,
    });
    let d = desc(8, 8);

    let a = p.borrow(d);
    let b = p.borrow(d);
    p.release(d, a);
    p.release(d, b);

    let st = p.stats();
    assert_eq!(st.retained_bytes, bytes_8x8);
    assert_eq!(st.retained_surfaces, 1);
}

#[test]
fn reused_pixmaps_come_back_cleared() {
    let mut p = SurfacePool::new(SurfacePoolOpts::default());
    let d = desc(2, 2);
    let mut a = p.borrow(d);
    a.data_as_u8_slice_mut().fill(200);
    p.release(d, a);

    let b = p.borrow(d);
    assert!(b.data_as_u8_slice().iter().all(|&v| v == 0));
    assert_eq!(p.stats().reused_surfaces, 1);
}

#[test]
fn oversized_desc_is_an_allocation_failure() {
    let err = SurfaceDesc::new(70_000, 1).unwrap_err();
    assert!(matches!(err, StrataError::AllocationFailure(_)));
}
