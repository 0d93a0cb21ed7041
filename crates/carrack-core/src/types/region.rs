//! Index regions
//!
//! A `Region` is an ordered sequence of per-dimension half-open ranges.
//! Dimensions without an explicit range span their full extent, so the empty
//! region addresses the whole array.

use crate::{CarrackError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Half-open index range `start..stop` along one dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    /// First index (inclusive)
    pub start: usize,
    /// One past the last index
    pub stop: usize,
}

impl IndexRange {
    /// Create a range
    pub const fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }

    /// Range covering a whole dimension
    pub const fn full(extent: usize) -> Self {
        Self::new(0, extent)
    }

    /// Number of indices in the range
    pub const fn len(self) -> usize {
        self.stop.saturating_sub(self.start)
    }

    /// Whether the range selects nothing
    pub const fn is_empty(self) -> bool {
        self.stop <= self.start
    }

    /// Overlap of two ranges; empty ranges collapse to `start == stop`
    pub fn intersect(self, other: Self) -> Self {
        let start = self.start.max(other.start);
        let stop = self.stop.min(other.stop).max(start);
        Self::new(start, stop)
    }

    /// Whether `other` lies entirely inside this range
    pub fn contains(self, other: Self) -> bool {
        other.is_empty() || (other.start >= self.start && other.stop <= self.stop)
    }
}

impl From<Range<usize>> for IndexRange {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.stop)
    }
}

/// Subset of an array addressed by per-dimension ranges
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    ranges: Vec<IndexRange>,
}

impl Region {
    /// The unconstrained region (whole array)
    pub fn full() -> Self {
        Self::default()
    }

    /// Region from explicit ranges, leading dimensions first
    pub fn new(ranges: Vec<IndexRange>) -> Self {
        Self { ranges }
    }

    /// Region from standard library ranges
    pub fn from_ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = Range<usize>>,
    {
        Self::new(ranges.into_iter().map(IndexRange::from).collect())
    }

    /// Region spanning exactly `shape`
    pub fn spanning(shape: &[usize]) -> Self {
        Self::new(shape.iter().map(|&extent| IndexRange::full(extent)).collect())
    }

    /// Explicit ranges, possibly fewer than the array's dimensions
    pub fn ranges(&self) -> &[IndexRange] {
        &self.ranges
    }

    /// Whether no dimension is constrained
    pub fn is_full(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Fill in missing dimensions and check bounds against `shape`
    pub fn resolve(&self, shape: &[usize]) -> Result<Vec<IndexRange>> {
        if self.ranges.len() > shape.len() {
            return Err(CarrackError::invalid(format!(
                "region {self} has {} dimensions but the array has {}",
                self.ranges.len(),
                shape.len()
            )));
        }

        let mut resolved = Vec::with_capacity(shape.len());
        for (dim, &extent) in shape.iter().enumerate() {
            let range = self
                .ranges
                .get(dim)
                .copied()
                .unwrap_or(IndexRange::full(extent));
            if range.start > range.stop || range.stop > extent {
                return Err(CarrackError::invalid(format!(
                    "range {range} is out of bounds for dimension {dim} of extent {extent}"
                )));
            }
            resolved.push(range);
        }
        Ok(resolved)
    }

    /// Shape of the selected sub-array
    pub fn shape_within(&self, shape: &[usize]) -> Result<Vec<usize>> {
        Ok(self.resolve(shape)?.iter().map(|r| r.len()).collect())
    }

    /// Overlap with `other`, or `None` when they share no element
    pub fn intersect(&self, other: &Region, shape: &[usize]) -> Result<Option<Region>> {
        let lhs = self.resolve(shape)?;
        let rhs = other.resolve(shape)?;
        let ranges: Vec<IndexRange> = lhs
            .iter()
            .zip(&rhs)
            .map(|(a, b)| a.intersect(*b))
            .collect();
        if ranges.iter().any(|r| r.is_empty()) {
            return Ok(None);
        }
        Ok(Some(Region::new(ranges)))
    }

    /// Express this region in the coordinates of `origin`
    ///
    /// Fails unless this region lies inside `origin`.
    pub fn relative_to(&self, origin: &Region, shape: &[usize]) -> Result<Region> {
        let inner = self.resolve(shape)?;
        let outer = origin.resolve(shape)?;
        let mut ranges = Vec::with_capacity(inner.len());
        for (a, b) in inner.iter().zip(&outer) {
            if !b.contains(*a) {
                return Err(CarrackError::invalid(format!(
                    "region {self} is not contained in {origin}"
                )));
            }
            let start = a.start.saturating_sub(b.start);
            ranges.push(IndexRange::new(start, start + a.len()));
        }
        Ok(Region::new(ranges))
    }
}

impl From<Vec<IndexRange>> for Region {
    fn from(ranges: Vec<IndexRange>) -> Self {
        Self::new(ranges)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return f.write_str("[..]");
        }
        f.write_str("[")?;
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{range}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_region_resolves_to_extent() {
        let resolved = Region::full().resolve(&[2, 3]).unwrap();
        assert_eq!(resolved, vec![IndexRange::new(0, 2), IndexRange::new(0, 3)]);
        assert_eq!(resolved, Region::spanning(&[2, 3]).resolve(&[2, 3]).unwrap());
    }

    #[test]
    fn test_partial_region_fills_trailing_dims() {
        let region = Region::from_ranges([1..2]);
        assert_eq!(region.shape_within(&[4, 5]).unwrap(), vec![1, 5]);
    }

    #[test]
    fn test_out_of_bounds_is_invalid() {
        let region = Region::from_ranges([0..5]);
        assert!(matches!(
            region.resolve(&[4]),
            Err(CarrackError::Invalid { .. })
        ));
        let too_many = Region::from_ranges([0..1, 0..1]);
        assert!(too_many.resolve(&[4]).is_err());
    }

    #[test]
    fn test_intersection_and_relative() {
        let shape = [8, 8];
        let a = Region::from_ranges([0..4, 2..6]);
        let b = Region::from_ranges([2..8, 0..4]);
        let overlap = a.intersect(&b, &shape).unwrap().unwrap();
        assert_eq!(overlap, Region::from_ranges([2..4, 2..4]));

        let local = overlap.relative_to(&b, &shape).unwrap();
        assert_eq!(local, Region::from_ranges([0..2, 2..4]));

        let disjoint = Region::from_ranges([4..8]);
        assert!(a.intersect(&disjoint, &shape).unwrap().is_none());
    }

    #[test]
    fn test_relative_requires_containment() {
        let shape = [10];
        let inner = Region::from_ranges([2..6]);
        let origin = Region::from_ranges([3..10]);
        assert!(inner.relative_to(&origin, &shape).is_err());
    }

    fn arb_range(extent: usize) -> impl proptest::strategy::Strategy<Value = Range<usize>> {
        use proptest::prelude::*;
        (0..=extent, 0..=extent).prop_map(|(a, b)| a.min(b)..a.max(b))
    }

    proptest::proptest! {
        #[test]
        fn intersection_lies_inside_both(
            (a0, a1) in (arb_range(12), arb_range(7)),
            (b0, b1) in (arb_range(12), arb_range(7)),
        ) {
            let shape = [12, 7];
            let a = Region::from_ranges([a0, a1]);
            let b = Region::from_ranges([b0, b1]);
            if let Some(overlap) = a.intersect(&b, &shape).unwrap() {
                let local = overlap.relative_to(&a, &shape).unwrap();
                let within_a = a.resolve(&shape).unwrap();
                for ((l, o), outer) in local.ranges().iter().zip(overlap.ranges()).zip(&within_a) {
                    proptest::prop_assert_eq!(l.start + outer.start, o.start);
                    proptest::prop_assert_eq!(l.len(), o.len());
                }
                proptest::prop_assert!(overlap.relative_to(&b, &shape).is_ok());
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Region::full().to_string(), "[..]");
        assert_eq!(Region::from_ranges([0..2, 1..3]).to_string(), "[0..2, 1..3]");
    }
}
