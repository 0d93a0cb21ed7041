//! Standard scores under every nan policy

use assert_matches::assert_matches;
use carrack_core::{CarrackError, ElementType, HostArray};
use carrack_stats::{contains_nan, zmap, zscore, NanPolicy};
use carrack_testkit::assert_close;
use proptest::prelude::*;

fn f64s(shape: &[usize], values: &[f64]) -> HostArray {
    HostArray::from_f64(shape, values).expect("host array")
}

fn values(a: &HostArray) -> Vec<f64> {
    a.to_vec::<f64>().expect("float64 output")
}

#[test]
fn empty_compare_gives_empty_output_of_its_shape() {
    let scores = f64s(&[3], &[1.0, 2.0, 3.0]);
    let compare = f64s(&[0, 4], &[]);

    let z = zmap(&scores, &compare, Some(0), 0, NanPolicy::Raise).expect("zmap");

    assert_eq!(z.shape(), &[0, 4]);
    assert_eq!(z.dtype(), ElementType::Float64);
    assert!(z.is_empty());
}

#[test]
fn propagate_poisons_only_the_lane_with_nan() {
    let a = f64s(&[3, 2], &[1.0, 1.0, f64::NAN, 2.0, 3.0, 3.0]);

    let z = zscore(&a, Some(0), 0, NanPolicy::Propagate).expect("zscore");

    let std = (2.0f64 / 3.0).sqrt();
    assert_close(
        &values(&z),
        &[f64::NAN, -1.0 / std, f64::NAN, 0.0, f64::NAN, 1.0 / std],
        1e-12,
    );
}

#[test]
fn omit_ignores_nans_in_compare_but_keeps_them_in_scores() {
    let compare = f64s(&[5], &[1.0, f64::NAN, 3.0, f64::NAN, 5.0]);
    let scores = f64s(&[3], &[3.0, f64::NAN, 7.0]);

    let z = zmap(&scores, &compare, None, 0, NanPolicy::Omit).expect("zmap");

    let std = (8.0f64 / 3.0).sqrt();
    assert_close(&values(&z), &[0.0, f64::NAN, 4.0 / std], 1e-12);
}

#[test]
fn omit_over_an_all_nan_lane_is_nan() {
    let a = f64s(&[2, 2], &[f64::NAN, 1.0, f64::NAN, 3.0]);

    let z = zscore(&a, Some(0), 0, NanPolicy::Omit).expect("zscore");

    assert_close(&values(&z), &[f64::NAN, -1.0, f64::NAN, 1.0], 1e-12);
}

#[test]
fn omit_along_an_axis_keeps_nan_from_making_a_lane_constant() {
    let compare = f64s(&[3, 2], &[1.0, 4.0, f64::NAN, 4.0, 1.0, 4.0]);
    let scores = f64s(&[2, 2], &[2.0, 4.0, 0.0, 5.0]);

    let z = zmap(&scores, &compare, Some(0), 0, NanPolicy::Omit).expect("zmap");

    // lane 0 has zero spread but is not constant, lane 1 is constant
    assert_close(
        &values(&z),
        &[f64::INFINITY, f64::NAN, f64::NEG_INFINITY, f64::NAN],
        1e-12,
    );
}

#[test]
fn omit_over_the_whole_array_ignores_nan_for_constancy() {
    let compare = f64s(&[3], &[1.0, f64::NAN, 1.0]);
    let scores = f64s(&[2], &[2.0, 0.0]);

    let z = zmap(&scores, &compare, None, 0, NanPolicy::Omit).expect("zmap");

    assert_close(&values(&z), &[f64::NAN, f64::NAN], 1e-12);
}

#[test]
fn raise_rejects_nan_in_compare() {
    let a = f64s(&[2], &[f64::NAN, 1.0]);
    assert_matches!(
        zscore(&a, None, 0, NanPolicy::Raise),
        Err(CarrackError::NanPresent)
    );
}

#[test]
fn unknown_policy_string_is_rejected() {
    assert_matches!(
        "ignore".parse::<NanPolicy>(),
        Err(CarrackError::InvalidNanPolicy { policy }) if policy == "ignore"
    );
}

#[test]
fn integer_input_scores_as_float() {
    let a = HostArray::from_slice(&[2, 2], &[1i32, 2, 3, 4]).expect("host array");

    let z = zscore(&a, Some(1), 0, NanPolicy::Propagate).expect("zscore");

    assert_eq!(z.dtype(), ElementType::Float64);
    assert_close(&values(&z), &[-1.0, 1.0, -1.0, 1.0], 1e-12);
}

#[test]
fn scores_may_differ_in_length_along_the_axis() {
    let compare = f64s(&[2, 2], &[0.0, 10.0, 2.0, 10.0]);
    let scores = f64s(&[3, 2], &[1.0, 10.0, 3.0, 11.0, -1.0, 9.0]);

    let z = zmap(&scores, &compare, Some(0), 0, NanPolicy::Propagate).expect("zmap");

    assert_close(
        &values(&z),
        &[0.0, f64::NAN, 2.0, f64::NAN, -2.0, f64::NAN],
        1e-12,
    );

    let misaligned = f64s(&[2, 3], &[0.0; 6]);
    assert_matches!(
        zmap(&misaligned, &compare, Some(0), 0, NanPolicy::Propagate),
        Err(CarrackError::Invalid { .. })
    );
}

#[test]
fn complex_input_has_no_real_scores() {
    let a = HostArray::zeros(ElementType::Complex64, vec![3]);
    assert!(!contains_nan(&a, NanPolicy::Raise).expect("nan check").contains_nan);
    assert_matches!(
        zscore(&a, None, 0, NanPolicy::Propagate),
        Err(CarrackError::UnsupportedElementType { .. })
    );
}

proptest! {
    #[test]
    fn lanes_are_standardized(
        rows in 2usize..6,
        cols in 1usize..5,
        seed in proptest::collection::vec(-1.0e3f64..1.0e3, 30),
    ) {
        let data: Vec<f64> = seed.iter().copied().take(rows * cols).collect();
        let a = f64s(&[rows, cols], &data);

        let z = values(&zscore(&a, Some(0), 0, NanPolicy::Propagate).expect("zscore"));

        for col in 0..cols {
            let lane: Vec<f64> = (0..rows).map(|r| z[r * cols + col]).collect();
            if lane.iter().all(|v| v.is_nan()) {
                continue;
            }
            let mean = lane.iter().sum::<f64>() / rows as f64;
            let var = lane.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / rows as f64;
            prop_assert!(mean.abs() < 1e-9, "lane {col} mean {mean}");
            prop_assert!((var - 1.0).abs() < 1e-9, "lane {col} variance {var}");
        }
    }

    #[test]
    fn omit_matches_scores_without_the_nans(
        finite in proptest::collection::vec(-50.0f64..50.0, 2..12),
        holes in proptest::collection::vec(any::<bool>(), 12),
    ) {
        let mut with_nans = Vec::new();
        for (i, v) in finite.iter().enumerate() {
            if holes[i] {
                with_nans.push(f64::NAN);
            }
            with_nans.push(*v);
        }
        let scores = f64s(&[finite.len()], &finite);
        let clean = f64s(&[finite.len()], &finite);
        let holey = f64s(&[with_nans.len()], &with_nans);

        let expected = zmap(&scores, &clean, None, 0, NanPolicy::Propagate).expect("zmap");
        let actual = zmap(&scores, &holey, None, 0, NanPolicy::Omit).expect("zmap");

        assert_close(&values(&actual), &values(&expected), 1e-9);
    }
}
