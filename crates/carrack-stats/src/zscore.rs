//! Standard scores
//!
//! `zmap` standardizes `scores` with the mean and standard deviation of
//! `compare`, either per lane along one axis or over the whole array. A lane
//! whose values are all equal has no spread; its scores are nan. A nan in a
//! lane makes it non-constant, except under `omit` over the whole array,
//! where nans are left out of the comparison.

use crate::nan_policy::{contains_nan, NanPolicy};
use carrack_core::{CarrackError, ElementType, HostArray, Result};

#[derive(Debug, Clone, Copy)]
struct LaneStats {
    mean: f64,
    std: f64,
    constant: bool,
}

impl LaneStats {
    /// `omit` drops nans from the mean and deviation; `nan_blind_constancy`
    /// also drops them from the constant-lane test
    fn of(values: &[f64], ddof: usize, omit: bool, nan_blind_constancy: bool) -> Self {
        let kept: Vec<f64> = if omit {
            values.iter().copied().filter(|v| !v.is_nan()).collect()
        } else {
            values.to_vec()
        };
        let n = kept.len();
        let mean = kept.iter().sum::<f64>() / n as f64;
        let std = if n > ddof {
            let ss: f64 = kept.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - ddof) as f64).sqrt()
        } else {
            f64::NAN
        };
        let compared = if nan_blind_constancy { &kept[..] } else { values };
        let constant = match compared.first() {
            None => true,
            Some(first) => compared.iter().all(|v| v == first),
        };
        Self {
            mean,
            std,
            constant,
        }
    }

    fn score(&self, x: f64) -> f64 {
        if self.constant {
            f64::NAN
        } else {
            (x - self.mean) / self.std
        }
    }
}

/// Row-major lane geometry around one axis
#[derive(Debug, Clone, Copy)]
struct Lanes {
    outer: usize,
    extent: usize,
    inner: usize,
}

impl Lanes {
    fn around(shape: &[usize], axis: usize) -> Self {
        Self {
            outer: shape[..axis].iter().product(),
            extent: shape[axis],
            inner: shape[axis + 1..].iter().product(),
        }
    }

    fn count(&self) -> usize {
        self.outer * self.inner
    }

    /// Flat offsets of the elements in lane `lane`
    fn offsets(&self, lane: usize) -> impl Iterator<Item = usize> {
        let (o, j) = (lane / self.inner, lane % self.inner);
        let Self { extent, inner, .. } = *self;
        (0..extent).map(move |i| (o * extent + i) * inner + j)
    }
}

fn check_axis(a: &HostArray, axis: usize) -> Result<()> {
    if axis >= a.ndim() {
        return Err(CarrackError::invalid(format!(
            "axis {axis} is out of bounds for an array of dimension {}",
            a.ndim()
        )));
    }
    Ok(())
}

/// Z-scores of `scores` relative to the mean and spread of `compare`
///
/// With `axis` set, statistics are taken per lane of `compare` along that
/// axis, and `scores` must match `compare` on every other dimension. With
/// `axis` unset, one mean and deviation cover the whole of `compare` and
/// `scores` may have any shape. `ddof` is subtracted from the element count
/// in the variance denominator.
///
/// `nan_policy` applies to `compare`: `propagate` lets nans poison their
/// lane, `raise` rejects them and `omit` leaves them out of the statistics.
/// Nans in `scores` always stay nan. An empty `compare` yields an empty
/// array of its shape.
pub fn zmap(
    scores: &HostArray,
    compare: &HostArray,
    axis: Option<usize>,
    ddof: usize,
    nan_policy: NanPolicy,
) -> Result<HostArray> {
    if compare.is_empty() {
        return Ok(HostArray::zeros(ElementType::Float64, compare.shape().to_vec()));
    }
    let check = contains_nan(compare, nan_policy)?;
    let omit = check.policy == NanPolicy::Omit;
    let reference = compare.to_f64_vec()?;
    let values = scores.to_f64_vec()?;

    let out = match axis {
        None => {
            let stats = LaneStats::of(&reference, ddof, omit, omit);
            values.iter().map(|&x| stats.score(x)).collect()
        }
        Some(axis) => {
            check_axis(compare, axis)?;
            let compatible = scores.ndim() == compare.ndim()
                && scores
                    .shape()
                    .iter()
                    .zip(compare.shape())
                    .enumerate()
                    .all(|(d, (s, c))| d == axis || s == c);
            if !compatible {
                return Err(CarrackError::invalid(format!(
                    "scores of shape {:?} do not line up with compare of shape {:?} along axis {axis}",
                    scores.shape(),
                    compare.shape()
                )));
            }

            let compare_lanes = Lanes::around(compare.shape(), axis);
            let score_lanes = Lanes::around(scores.shape(), axis);
            let mut out = vec![f64::NAN; values.len()];
            let mut lane_values = Vec::with_capacity(compare_lanes.extent);
            for lane in 0..compare_lanes.count() {
                lane_values.clear();
                lane_values.extend(compare_lanes.offsets(lane).map(|k| reference[k]));
                let stats = LaneStats::of(&lane_values, ddof, omit, false);
                for k in score_lanes.offsets(lane) {
                    out[k] = stats.score(values[k]);
                }
            }
            out
        }
    };

    tracing::trace!(
        elements = values.len(),
        ?axis,
        ddof,
        policy = %check.policy,
        "z-scores computed"
    );
    HostArray::from_f64(scores.shape(), &out)
}

/// Z-scores of `a` relative to itself
pub fn zscore(a: &HostArray, axis: Option<usize>, ddof: usize, nan_policy: NanPolicy) -> Result<HostArray> {
    zmap(a, a, axis, ddof, nan_policy)
}
