//! Assertion helpers

use carrack_core::{CarrackError, HostArray};

/// Assert two host arrays are bit-identical
pub fn assert_host_eq(actual: &HostArray, expected: &HostArray) {
    assert_eq!(actual.dtype(), expected.dtype(), "element types differ");
    assert_eq!(actual.shape(), expected.shape(), "shapes differ");
    assert!(
        actual.bytes() == expected.bytes(),
        "contents differ:\n  actual:   {:?}\n  expected: {:?}",
        actual.bytes(),
        expected.bytes()
    );
}

/// Assert element-wise closeness, treating nan as equal to nan and
/// infinities as equal to themselves
pub fn assert_close(actual: &[f64], expected: &[f64], tolerance: f64) {
    assert_eq!(actual.len(), expected.len(), "lengths differ");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let ok = a == e || (a.is_nan() && e.is_nan()) || (a - e).abs() <= tolerance;
        assert!(ok, "element {i}: got {a}, expected {e}");
    }
}

/// Assert a result failed with the given error discriminant
pub fn assert_error_kind<T: std::fmt::Debug>(result: Result<T, CarrackError>, expected: &CarrackError) {
    match result {
        Ok(value) => panic!("expected {expected:?}, got Ok({value:?})"),
        Err(err) => assert_eq!(
            std::mem::discriminant(&err),
            std::mem::discriminant(expected),
            "expected {expected:?}, got {err:?}"
        ),
    }
}
