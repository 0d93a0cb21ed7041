//! Row-major layout helpers
//!
//! Strides and offsets are measured in elements, not bytes.

use super::IndexRange;

/// Number of elements in an array of `shape`
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Row-major strides for a contiguous array of `shape`
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut acc = 1usize;
    for (dim, &extent) in shape.iter().enumerate().rev() {
        strides[dim] = acc;
        acc *= extent.max(1);
    }
    strides
}

/// Call `f` with the element offset of every position inside `ranges`
///
/// Positions are visited in row-major order. An empty `ranges` slice is a
/// zero-dimensional array with a single element at `base`.
pub fn for_each_offset(ranges: &[IndexRange], strides: &[usize], base: usize, mut f: impl FnMut(usize)) {
    debug_assert_eq!(ranges.len(), strides.len());
    if ranges.iter().any(|r| r.is_empty()) {
        return;
    }

    let mut index: Vec<usize> = ranges.iter().map(|r| r.start).collect();
    loop {
        let offset = base
            + index
                .iter()
                .zip(strides)
                .map(|(i, s)| i * s)
                .sum::<usize>();
        f(offset);

        let mut dim = ranges.len();
        loop {
            if dim == 0 {
                return;
            }
            dim -= 1;
            index[dim] += 1;
            if index[dim] < ranges[dim].stop {
                break;
            }
            index[dim] = ranges[dim].start;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(ranges: &[IndexRange], strides: &[usize], base: usize) -> Vec<usize> {
        let mut out = Vec::new();
        for_each_offset(ranges, strides, base, |o| out.push(o));
        out
    }

    #[test]
    fn test_contiguous_strides() {
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(contiguous_strides(&[]), Vec::<usize>::new());
        assert_eq!(contiguous_strides(&[0, 5]), vec![5, 1]);
    }

    #[test]
    fn test_offsets_of_subregion() {
        // rows 1..3, cols 1..3 of a 3x4 array
        let ranges = [IndexRange::new(1, 3), IndexRange::new(1, 3)];
        assert_eq!(offsets(&ranges, &[4, 1], 0), vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_scalar_and_empty() {
        assert_eq!(offsets(&[], &[], 7), vec![7]);
        assert!(offsets(&[IndexRange::new(2, 2)], &[1], 0).is_empty());
    }
}
