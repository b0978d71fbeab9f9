use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        TimelineError::alloc("x")
            .to_string()
            .contains("memory allocation failure:")
    );
    assert!(
        TimelineError::malformed("x")
            .to_string()
            .contains("malformed event:")
    );
    assert!(
        TimelineError::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert_eq!(TimelineError::Cancelled.to_string(), "render cancelled");
}

#[test]
fn io_failures_name_their_kind_and_are_retryable() {
    let err = TimelineError::io(IoKind::WriteFrame, "disk full");
    assert_eq!(err.to_string(), "i/o failure (write frame): disk full");
    assert!(err.is_retryable());
    assert_eq!(err.io_kind(), Some(IoKind::WriteFrame));
    assert!(!TimelineError::malformed("x").is_retryable());
    assert!(!TimelineError::Cancelled.is_retryable());
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = TimelineError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}

#[test]
fn try_reserve_failure_maps_to_allocation_error() {
    let mut v: Vec<u64> = Vec::new();
    let e = v.try_reserve(usize::MAX).unwrap_err();
    let err = TimelineError::from(e);
    assert!(matches!(err, TimelineError::MemoryAllocation(_)));
}
