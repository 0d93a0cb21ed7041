//! Device-resident strided arrays

use super::memory::{Allocation, MemoryPool};
use super::next_object_id;
use super::runtime::Device;
use super::stream::Stream;
use crate::capsule::Capsule;
use carrack_core::types::{contiguous_strides, for_each_offset};
use carrack_core::{element_count, CarrackError, DeviceId, ElementType, IndexRange, Region, Result};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Fill byte for freshly allocated, uninitialized memory
const UNINIT_FILL: u8 = 0xA5;

struct DeviceBuffer {
    id: u64,
    device: DeviceId,
    data: RwLock<Vec<u8>>,
    allocation: Allocation,
}

/// Address of an array's first element: buffer id plus byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataPtr {
    /// Backing buffer
    pub buffer: u64,
    /// Byte offset into the buffer
    pub byte_offset: usize,
}

/// View over a device buffer
///
/// Cloning shares the buffer. Strides and offset are in elements.
#[derive(Clone)]
pub struct DeviceArray {
    buffer: Arc<DeviceBuffer>,
    dtype: ElementType,
    shape: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
}

impl DeviceArray {
    /// Allocate an uninitialized contiguous array from `pool`
    pub fn allocate(pool: &Arc<MemoryPool>, dtype: ElementType, shape: &[usize]) -> Result<Self> {
        let nbytes = element_count(shape)
            .checked_mul(dtype.size_bytes())
            .ok_or_else(|| CarrackError::invalid(format!("array of shape {shape:?} is too large")))?;
        let allocation = pool.allocate(nbytes)?;
        Ok(Self {
            buffer: Arc::new(DeviceBuffer {
                id: next_object_id(),
                device: pool.device(),
                data: RwLock::new(vec![UNINIT_FILL; nbytes]),
                allocation,
            }),
            dtype,
            shape: shape.to_vec(),
            strides: contiguous_strides(shape),
            offset: 0,
        })
    }

    /// Device holding the buffer
    pub fn device(&self) -> DeviceId {
        self.buffer.device
    }

    /// Pool the buffer was allocated from
    pub fn pool(&self) -> &Arc<MemoryPool> {
        self.buffer.allocation.pool()
    }

    /// Element type
    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    /// Extent of each dimension
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements
    pub fn size(&self) -> usize {
        element_count(&self.shape)
    }

    /// Size of the viewed elements in bytes
    pub fn nbytes(&self) -> usize {
        self.size() * self.dtype.size_bytes()
    }

    /// Strides in elements
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Whether elements are laid out row-major without gaps
    pub fn is_contiguous(&self) -> bool {
        if self.size() == 0 {
            return true;
        }
        self.shape
            .iter()
            .zip(self.strides.iter().zip(contiguous_strides(&self.shape)))
            .all(|(&extent, (&stride, expected))| extent <= 1 || stride == expected)
    }

    /// Address of the first element
    pub fn data_ptr(&self) -> DataPtr {
        DataPtr {
            buffer: self.buffer.id,
            byte_offset: self.offset * self.dtype.size_bytes(),
        }
    }

    /// Whether both arrays view the same buffer
    pub fn same_memory(&self, other: &DeviceArray) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Whether anything besides this array still references the buffer
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.buffer) > 1
    }

    /// Sub-array selected by `region`, sharing the buffer
    pub fn view(&self, region: &Region) -> Result<DeviceArray> {
        let ranges = region.resolve(&self.shape)?;
        let offset = self.offset
            + ranges
                .iter()
                .zip(&self.strides)
                .map(|(r, s)| r.start * s)
                .sum::<usize>();
        Ok(Self {
            buffer: Arc::clone(&self.buffer),
            dtype: self.dtype,
            shape: ranges.iter().map(|r| r.len()).collect(),
            strides: self.strides.clone(),
            offset,
        })
    }

    /// View with the dimension order reversed
    pub fn transposed(&self) -> DeviceArray {
        let mut view = self.clone();
        view.shape.reverse();
        view.strides.reverse();
        view
    }

    /// Gather every element into a contiguous byte vector
    ///
    /// Reads the buffer as it is now; callers must have synchronized with
    /// any pending writer.
    pub fn read_bytes(&self) -> Vec<u8> {
        let full: Vec<IndexRange> = self.shape.iter().map(|&e| IndexRange::full(e)).collect();
        self.gather(&full)
    }

    /// Overwrite every element from contiguous bytes
    pub fn write_bytes(&self, src: &[u8]) -> Result<()> {
        let full: Vec<IndexRange> = self.shape.iter().map(|&e| IndexRange::full(e)).collect();
        self.write_region(&full, src)
    }

    /// Gather the elements inside `ranges`
    pub fn read_region(&self, ranges: &[IndexRange]) -> Result<Vec<u8>> {
        self.check_ranges(ranges)?;
        Ok(self.gather(ranges))
    }

    /// Scatter contiguous `src` bytes into the elements inside `ranges`
    pub fn write_region(&self, ranges: &[IndexRange], src: &[u8]) -> Result<()> {
        self.check_ranges(ranges)?;
        let width = self.dtype.size_bytes();
        let expected = ranges.iter().map(|r| r.len()).product::<usize>() * width;
        if src.len() != expected {
            return Err(CarrackError::invalid(format!(
                "region needs {expected} bytes, got {}",
                src.len()
            )));
        }
        let mut data = self.buffer.data.write();
        let mut cursor = 0;
        for_each_offset(ranges, &self.strides, self.offset, |offset| {
            let at = offset * width;
            data[at..at + width].copy_from_slice(&src[cursor..cursor + width]);
            cursor += width;
        });
        Ok(())
    }

    /// Enqueue a copy into a new buffer on the same device
    pub fn copy_on(&self, stream: &Stream) -> Result<DeviceArray> {
        self.copy_into(self.pool(), stream)
    }

    /// Enqueue a copy into a new buffer on `device`
    pub fn copy_to(&self, device: &Device, stream: &Stream) -> Result<DeviceArray> {
        self.copy_into(device.pool(), stream)
    }

    /// This array if already contiguous, otherwise an enqueued contiguous copy
    pub fn ascontiguous_on(&self, stream: &Stream) -> Result<DeviceArray> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }
        self.copy_on(stream)
    }

    /// Export through a single-use capsule
    pub fn to_capsule(&self) -> Capsule {
        Capsule::new(self.clone())
    }

    /// Import the array held by `capsule`, consuming it
    pub fn from_capsule(capsule: &Capsule) -> Result<DeviceArray> {
        capsule.consume()
    }

    fn copy_into(&self, pool: &Arc<MemoryPool>, stream: &Stream) -> Result<DeviceArray> {
        let dst = DeviceArray::allocate(pool, self.dtype, &self.shape)?;
        let (src, target) = (self.clone(), dst.clone());
        stream.enqueue("array copy", move || target.write_bytes(&src.read_bytes()))?;
        Ok(dst)
    }

    fn gather(&self, ranges: &[IndexRange]) -> Vec<u8> {
        let width = self.dtype.size_bytes();
        let count = ranges.iter().map(|r| r.len()).product::<usize>();
        let mut out = Vec::with_capacity(count * width);
        let data = self.buffer.data.read();
        for_each_offset(ranges, &self.strides, self.offset, |offset| {
            out.extend_from_slice(&data[offset * width..(offset + 1) * width]);
        });
        out
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

impl fmt::Debug for DeviceArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceArray")
            .field("device", &self.buffer.device)
            .field("buffer", &self.buffer.id)
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("offset", &self.offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carrack_core::HostArray;

    fn pool() -> Arc<MemoryPool> {
        MemoryPool::new(DeviceId(0), 1 << 20)
    }

    fn filled(pool: &Arc<MemoryPool>, shape: &[usize]) -> DeviceArray {
        let array = DeviceArray::allocate(pool, ElementType::Int32, shape).unwrap();
        let values: Vec<i32> = (0..element_count(shape) as i32).collect();
        let host = HostArray::from_slice(shape, &values).unwrap();
        array.write_bytes(host.bytes()).unwrap();
        array
    }

    fn as_i32(bytes: &[u8]) -> Vec<i32> {
        bytes
            .chunks_exact(4)
            .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn test_view_shares_buffer() {
        let pool = pool();
        let array = filled(&pool, &[3, 4]);
        let view = array.view(&Region::from_ranges([1..3, 1..3])).unwrap();
        assert!(view.same_memory(&array));
        assert_eq!(view.shape(), &[2, 2]);
        assert!(!view.is_contiguous());
        assert_eq!(as_i32(&view.read_bytes()), vec![5, 6, 9, 10]);
        assert_eq!(view.data_ptr().byte_offset, 5 * 4);
    }

    #[test]
    fn test_transposed_reads_columns() {
        let pool = pool();
        let array = filled(&pool, &[2, 3]);
        let t = array.transposed();
        assert_eq!(t.shape(), &[3, 2]);
        assert!(!t.is_contiguous());
        assert_eq!(as_i32(&t.read_bytes()), vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_write_region_checks_length() {
        let pool = pool();
        let array = filled(&pool, &[4]);
        let ranges = [IndexRange::new(1, 3)];
        assert!(array.write_region(&ranges, &[0u8; 4]).is_err());
        array.write_region(&ranges, &[0u8; 8]).unwrap();
        assert_eq!(as_i32(&array.read_bytes()), vec![0, 0, 0, 3]);
    }

    #[test]
    fn test_buffer_returns_to_pool_on_last_drop() {
        let pool = pool();
        let array = filled(&pool, &[8]);
        let view = array.view(&Region::full()).unwrap();
        assert!(array.is_shared());
        drop(array);
        assert_eq!(pool.used_bytes(), 32);
        drop(view);
        assert_eq!(pool.used_bytes(), 0);
        assert_eq!(pool.n_free_blocks(), 1);
    }

    #[tokio::test]
    async fn test_ascontiguous_copies_strided_views() {
        let pool = pool();
        let stream = Stream::spawn(DeviceId(0)).unwrap();
        let array = filled(&pool, &[2, 3]);

        let same = array.ascontiguous_on(&stream).unwrap();
        assert!(same.same_memory(&array));

        let t = array.transposed().ascontiguous_on(&stream).unwrap();
        assert!(!t.same_memory(&array));
        assert!(t.is_contiguous());
        stream.synchronize().await.unwrap();
        assert_eq!(as_i32(&t.read_bytes()), vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_zero_size_array() {
        let pool = pool();
        let array = DeviceArray::allocate(&pool, ElementType::Float64, &[0, 3]).unwrap();
        assert!(array.is_contiguous());
        assert!(array.read_bytes().is_empty());
        array.write_bytes(&[]).unwrap();
    }
}
