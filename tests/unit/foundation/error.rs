use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        StrataError::allocation("x")
            .to_string()
            .contains("allocation failure:")
    );
    assert!(
        StrataError::invalid_dimensions(0, 5)
            .to_string()
            .contains("invalid dimensions: 0x5")
    );
    assert!(
        StrataError::CyclicReference(NodeId(3))
            .to_string()
            .contains("cyclic reference through node #3")
    );
    assert!(
        StrataError::mismatched_layers("x")
            .to_string()
            .contains("mismatched layer pairing:")
    );
    assert!(
        StrataError::backend("x")
            .to_string()
            .contains("backend composite failure:")
    );
    assert!(
        StrataError::validation("x")
            .to_string()
            .contains("validation error:")
    );
}

#[test]
fn only_reference_errors_are_recoverable() {
    assert!(StrataError::allocation("x").is_recoverable());
    assert!(StrataError::invalid_dimensions(-1, 2).is_recoverable());
    assert!(StrataError::CyclicReference(NodeId(0)).is_recoverable());

    assert!(!StrataError::mismatched_layers("x").is_recoverable());
    assert!(!StrataError::backend("x").is_recoverable());
    assert!(!StrataError::unbound("x").is_recoverable());
    assert!(!StrataError::validation("x").is_recoverable());
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = StrataError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
