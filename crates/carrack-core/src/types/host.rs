//! Host-resident arrays
//!
//! `HostArray` is the staging format for uploads and downloads and the input
//! type of the statistics helpers. Storage is row-major and contiguous.

use super::{contiguous_strides, element_count, for_each_offset, Element, ElementType, IndexRange};
use crate::{CarrackError, Result};
use half::f16;

/// Contiguous host array with a runtime element type
#[derive(Debug, Clone, PartialEq)]
pub struct HostArray {
    dtype: ElementType,
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

impl HostArray {
    /// Wrap raw bytes; the length must match `shape` and `dtype`
    pub fn new(dtype: ElementType, shape: Vec<usize>, bytes: Vec<u8>) -> Result<Self> {
        let expected = element_count(&shape) * dtype.size_bytes();
        if bytes.len() != expected {
            return Err(CarrackError::invalid(format!(
                "{dtype} array of shape {shape:?} needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            dtype,
            shape,
            bytes,
        })
    }

    /// Zero-filled array
    pub fn zeros(dtype: ElementType, shape: Vec<usize>) -> Self {
        let bytes = vec![0u8; element_count(&shape) * dtype.size_bytes()];
        Self {
            dtype,
            shape,
            bytes,
        }
    }

    /// Copy typed values into a new array
    pub fn from_slice<T: Element>(shape: &[usize], values: &[T]) -> Result<Self> {
        if values.len() != element_count(shape) {
            return Err(CarrackError::invalid(format!(
                "shape {shape:?} holds {} elements, got {}",
                element_count(shape),
                values.len()
            )));
        }
        let width = T::DTYPE.size_bytes();
        let mut bytes = vec![0u8; values.len() * width];
        for (value, out) in values.iter().zip(bytes.chunks_exact_mut(width)) {
            value.write_bytes(out);
        }
        Ok(Self {
            dtype: T::DTYPE,
            shape: shape.to_vec(),
            bytes,
        })
    }

    /// Float64 array from values
    pub fn from_f64(shape: &[usize], values: &[f64]) -> Result<Self> {
        Self::from_slice(shape, values)
    }

    /// Element type
    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    /// Array shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        element_count(&self.shape)
    }

    /// Whether the array holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw contiguous bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable raw bytes
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Consume into raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Size in bytes
    pub fn nbytes(&self) -> usize {
        self.bytes.len()
    }

    /// Typed copy of the elements; `T` must match the element type
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(CarrackError::invalid(format!(
                "cannot read {} array as {}",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(self
            .bytes
            .chunks_exact(self.dtype.size_bytes())
            .map(T::read_bytes)
            .collect())
    }

    /// Elements converted to `f64`
    ///
    /// Complex and opaque arrays have no real-valued view.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let width = self.dtype.size_bytes();
        let chunks = self.bytes.chunks_exact(width.max(1));
        let values = match self.dtype {
            ElementType::Bool => chunks.map(|b| f64::from(u8::from(bool::read_bytes(b)))).collect(),
            ElementType::Int8 => chunks.map(|b| f64::from(i8::read_bytes(b))).collect(),
            ElementType::UInt8 => chunks.map(|b| f64::from(u8::read_bytes(b))).collect(),
            ElementType::Int16 => chunks.map(|b| f64::from(i16::read_bytes(b))).collect(),
            ElementType::UInt16 => chunks.map(|b| f64::from(u16::read_bytes(b))).collect(),
            ElementType::Float16 => chunks.map(|b| f16::read_bytes(b).to_f64()).collect(),
            ElementType::Int32 => chunks.map(|b| f64::from(i32::read_bytes(b))).collect(),
            ElementType::UInt32 => chunks.map(|b| f64::from(u32::read_bytes(b))).collect(),
            ElementType::Float32 => chunks.map(|b| f64::from(f32::read_bytes(b))).collect(),
            ElementType::Int64 => chunks.map(|b| i64::read_bytes(b) as f64).collect(),
            ElementType::UInt64 => chunks.map(|b| u64::read_bytes(b) as f64).collect(),
            ElementType::Float64 => chunks.map(f64::read_bytes).collect(),
            ElementType::Complex64 | ElementType::Complex128 | ElementType::Opaque(_) => {
                return Err(CarrackError::unsupported_dtype(
                    self.dtype,
                    "real-valued conversion",
                ));
            }
        };
        Ok(values)
    }

    /// Contiguous copy of the elements inside `ranges`
    pub fn slice(&self, ranges: &[IndexRange]) -> Result<HostArray> {
        self.check_ranges(ranges)?;
        let width = self.dtype.size_bytes();
        let shape: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
        let mut bytes = Vec::with_capacity(element_count(&shape) * width);
        for_each_offset(ranges, &contiguous_strides(&self.shape), 0, |offset| {
            bytes.extend_from_slice(&self.bytes[offset * width..(offset + 1) * width]);
        });
        HostArray::new(self.dtype, shape, bytes)
    }

    /// Overwrite the elements inside `ranges` with contiguous `src` bytes
    pub fn write_region(&mut self, ranges: &[IndexRange], src: &[u8]) -> Result<()> {
        self.check_ranges(ranges)?;
        let width = self.dtype.size_bytes();
        let count: usize = ranges.iter().map(|r| r.len()).product();
        if src.len() != count * width {
            return Err(CarrackError::invalid(format!(
                "region of {count} elements needs {} bytes, got {}",
                count * width,
                src.len()
            )));
        }
        let strides = contiguous_strides(&self.shape);
        let mut cursor = 0;
        let bytes = &mut self.bytes;
        for_each_offset(ranges, &strides, 0, |offset| {
            bytes[offset * width..(offset + 1) * width]
                .copy_from_slice(&src[cursor..cursor + width]);
            cursor += width;
        });
        Ok(())
    }

    /// Row-major element offsets of every position inside `ranges`
    pub fn offsets(&self, ranges: &[IndexRange]) -> Result<Vec<usize>> {
        self.check_ranges(ranges)?;
        let mut offsets = Vec::new();
        for_each_offset(ranges, &contiguous_strides(&self.shape), 0, |o| offsets.push(o));
        Ok(offsets)
    }

    fn check_ranges(&self, ranges: &[IndexRange]) -> Result<()> {
        if ranges.len() != self.shape.len() {
            return Err(CarrackError::invalid(format!(
                "expected {} ranges, got {}",
                self.shape.len(),
                ranges.len()
            )));
        }
        for (range, &extent) in ranges.iter().zip(&self.shape) {
            if range.start > range.stop || range.stop > extent {
                return Err(CarrackError::invalid(format!(
                    "range {range} is out of bounds for extent {extent}"
                )));
            }
        }
        Ok(())
    }
}
