//! Chunked arrays with eventually-consistent updates
//!
//! Each device holds one chunk covering a region of the global array. Chunks
//! may overlap. A write is sliced per overlapping chunk, transferred to that
//! chunk's device and queued there; queues drain in submission order when the
//! chunk is next read or explicitly synchronized.
//!
//! In op mode every global position has exactly one owner (the first chunk in
//! the index map that covers it). Other chunks covering the position start
//! from the operator's identity, so combining all chunks yields the value.
//! Op-mode writes are routed to the owner of each position only.

use crate::engine::{PendingTransfer, TransferEngine};
use crate::handle::AsyncHandle;
use crate::update::{apply_updates, PartialUpdate, UpdateMode};
use carrack_core::{CarrackError, DeviceId, ElementType, HostArray, IndexRange, Region, Result};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

#[derive(Debug)]
struct Chunk {
    region: Region,
    ranges: Vec<IndexRange>,
    data: AsyncHandle,
    pending: VecDeque<PartialUpdate>,
}

/// Array split into per-device chunks
#[derive(Debug)]
pub struct DistributedArray {
    engine: Arc<TransferEngine>,
    dtype: ElementType,
    shape: Vec<usize>,
    mode: UpdateMode,
    order: Vec<DeviceId>,
    chunks: BTreeMap<DeviceId, Chunk>,
}

impl DistributedArray {
    /// Scatter `host` onto the devices of `index_map`
    ///
    /// Every device must belong to the engine's registry and appear once.
    pub fn from_host(
        engine: Arc<TransferEngine>,
        host: &HostArray,
        index_map: &[(DeviceId, Region)],
        mode: UpdateMode,
    ) -> Result<Self> {
        if index_map.is_empty() {
            return Err(CarrackError::invalid("index map is empty"));
        }
        let shape = host.shape().to_vec();
        let width = host.dtype().size_bytes();
        let mut chunks = BTreeMap::new();
        let mut order = Vec::with_capacity(index_map.len());
        let mut owned: Vec<Region> = Vec::new();

        for (device_id, region) in index_map {
            engine.registry().communicator(*device_id)?;
            if chunks.contains_key(device_id) {
                return Err(CarrackError::invalid(format!(
                    "{device_id} appears more than once in the index map"
                )));
            }
            let ranges = region.resolve(&shape)?;
            let region = Region::new(ranges.clone());
            let mut local = host.slice(&ranges)?;

            if let UpdateMode::Op(combine) = &mode {
                for earlier in &owned {
                    let Some(overlap) = earlier.intersect(&region, &shape)? else {
                        continue;
                    };
                    let within = overlap.relative_to(&region, &shape)?;
                    let within = within.resolve(local.shape())?;
                    let count: usize = within.iter().map(|r| r.len()).product();
                    let identity = combine.identity(host.dtype())?;
                    let fill: Vec<u8> = identity.iter().copied().cycle().take(count * width).collect();
                    local.write_region(&within, &fill)?;
                }
            }

            let device = engine.runtime().device(*device_id)?;
            let data = AsyncHandle::completed(device.upload(&local)?);
            owned.push(region.clone());
            order.push(*device_id);
            chunks.insert(
                *device_id,
                Chunk {
                    region,
                    ranges,
                    data,
                    pending: VecDeque::new(),
                },
            );
        }

        tracing::debug!(
            devices = order.len(),
            shape = ?shape,
            replica = mode.is_replica(),
            "distributed array created"
        );
        Ok(Self {
            engine,
            dtype: host.dtype(),
            shape,
            mode,
            order,
            chunks,
        })
    }

    /// Element type
    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    /// Global shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Update mode
    pub fn mode(&self) -> &UpdateMode {
        &self.mode
    }

    /// Devices in index-map order
    pub fn devices(&self) -> &[DeviceId] {
        &self.order
    }

    /// Global region held by each device, in index-map order
    pub fn index_map(&self) -> Vec<(DeviceId, Region)> {
        self.order
            .iter()
            .filter_map(|d| self.chunks.get(d).map(|c| (*d, c.region.clone())))
            .collect()
    }

    /// Queue `data` as a write of the global `region`
    ///
    /// Never blocks: the overlapping slices are transferred asynchronously and
    /// queued on their chunks.
    pub fn update(&mut self, region: &Region, data: &AsyncHandle) -> Result<()> {
        if data.dtype() != self.dtype {
            return Err(CarrackError::invalid(format!(
                "cannot write {} data into a {} array",
                data.dtype(),
                self.dtype
            )));
        }
        let expected = region.shape_within(&self.shape)?;
        if data.shape() != expected.as_slice() {
            return Err(CarrackError::invalid(format!(
                "data of shape {:?} does not fit region {region} of shape {expected:?}",
                data.shape()
            )));
        }

        let global = region.resolve(&self.shape)?;
        let mut pending = Vec::new();
        for (device_id, piece) in self.route(&global) {
            let Some(chunk) = self.chunks.get(&device_id) else {
                continue;
            };
            let piece = Region::new(piece);
            let source = data.array().view(&piece.relative_to(region, &self.shape)?)?;
            pending.push(PendingTransfer {
                data: AsyncHandle::new(source, data.ready().clone()),
                region: piece.relative_to(&chunk.region, &self.shape)?,
                target: device_id,
            });
        }

        for (device_id, update) in self.engine.drain(pending)? {
            if let Some(chunk) = self.chunks.get_mut(&device_id) {
                chunk.pending.push_back(update);
            }
        }
        Ok(())
    }

    /// Number of updates queued for `device`
    pub fn pending(&self, device: DeviceId) -> Result<usize> {
        Ok(self.chunk_entry(device)?.pending.len())
    }

    /// Apply every queued update of `device`, in order
    pub fn synchronize_device(&mut self, device: DeviceId) -> Result<()> {
        let stream = self.engine.runtime().device(device)?.current_stream();
        let mode = self.mode.clone();
        let chunk = self.chunk_entry_mut(device)?;
        if chunk.pending.is_empty() {
            return Ok(());
        }
        let updates: Vec<PartialUpdate> = chunk.pending.iter().cloned().collect();
        let data = apply_updates(&chunk.data, &updates, &mode, &stream)?;
        chunk.pending.clear();
        chunk.data = data;
        tracing::trace!(%device, updates = updates.len(), "chunk synchronized");
        Ok(())
    }

    /// Apply every queued update on every device
    pub fn synchronize(&mut self) -> Result<()> {
        for device in self.order.clone() {
            self.synchronize_device(device)?;
        }
        Ok(())
    }

    /// Current chunk of `device`, after its queued updates
    pub fn chunk(&mut self, device: DeviceId) -> Result<AsyncHandle> {
        self.synchronize_device(device)?;
        Ok(self.chunk_entry(device)?.data.clone())
    }

    /// Gather the global array on the host
    ///
    /// Replica mode takes each position from the last chunk covering it; op
    /// mode combines every covering chunk. Positions no chunk covers are zero.
    pub async fn to_host(&mut self) -> Result<HostArray> {
        self.synchronize()?;
        let width = self.dtype.size_bytes();
        let mut out = HostArray::zeros(self.dtype, self.shape.clone());
        let mut covered = vec![false; out.len()];

        for device in &self.order {
            let chunk = self.chunk_entry(*device)?;
            let local = chunk.data.to_host().await?;
            let offsets = out.offsets(&chunk.ranges)?;
            let bytes = out.bytes_mut();
            for (&offset, value) in offsets.iter().zip(local.bytes().chunks_exact(width)) {
                let slot = &mut bytes[offset * width..(offset + 1) * width];
                match &self.mode {
                    UpdateMode::Op(combine) if covered[offset] => {
                        combine.combine(self.dtype, slot, value)?;
                    }
                    _ => slot.copy_from_slice(value),
                }
                covered[offset] = true;
            }
        }
        Ok(out)
    }

    /// Split a global write into per-chunk pieces
    ///
    /// Replica mode writes every chunk that overlaps. Op mode assigns each
    /// position to the first chunk covering it, so no position is combined
    /// twice.
    fn route(&self, global: &[IndexRange]) -> Vec<(DeviceId, Vec<IndexRange>)> {
        let mut pieces = Vec::new();
        let mut remaining = vec![global.to_vec()];
        for device_id in &self.order {
            let Some(chunk) = self.chunks.get(device_id) else {
                continue;
            };
            if self.mode.is_replica() {
                if let Some(piece) = intersect(global, &chunk.ranges) {
                    pieces.push((*device_id, piece));
                }
                continue;
            }
            let mut left = Vec::new();
            for rect in remaining {
                match intersect(&rect, &chunk.ranges) {
                    Some(piece) => {
                        left.extend(subtract(&rect, &piece));
                        pieces.push((*device_id, piece));
                    }
                    None => left.push(rect),
                }
            }
            remaining = left;
        }
        pieces
    }

    fn chunk_entry(&self, device: DeviceId) -> Result<&Chunk> {
        self.chunks
            .get(&device)
            .ok_or_else(|| CarrackError::invalid(format!("{device} holds no chunk")))
    }

    fn chunk_entry_mut(&mut self, device: DeviceId) -> Result<&mut Chunk> {
        self.chunks
            .get_mut(&device)
            .ok_or_else(|| CarrackError::invalid(format!("{device} holds no chunk")))
    }
}

fn intersect(a: &[IndexRange], b: &[IndexRange]) -> Option<Vec<IndexRange>> {
    let ranges: Vec<IndexRange> = a.iter().zip(b).map(|(x, y)| x.intersect(*y)).collect();
    if ranges.iter().any(|r| r.is_empty()) {
        return None;
    }
    Some(ranges)
}

/// Cover `rect` minus `hole` with disjoint boxes; `hole` must lie inside `rect`
fn subtract(rect: &[IndexRange], hole: &[IndexRange]) -> Vec<Vec<IndexRange>> {
    let mut out = Vec::new();
    let mut rest = rect.to_vec();
    for dim in 0..rect.len() {
        if rest[dim].start < hole[dim].start {
            let mut below = rest.clone();
            below[dim] = IndexRange::new(rest[dim].start, hole[dim].start);
            out.push(below);
        }
        if hole[dim].stop < rest[dim].stop {
            let mut above = rest.clone();
            above[dim] = IndexRange::new(hole[dim].stop, rest[dim].stop);
            out.push(above);
        }
        rest[dim] = hole[dim];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(spec: &[(usize, usize)]) -> Vec<IndexRange> {
        spec.iter().map(|&(a, b)| IndexRange::new(a, b)).collect()
    }

    fn volume(boxes: &[Vec<IndexRange>]) -> usize {
        boxes
            .iter()
            .map(|b| b.iter().map(|r| r.len()).product::<usize>())
            .sum()
    }

    #[test]
    fn test_subtract_covers_remainder() {
        let rect = ranges(&[(0, 4), (0, 4)]);
        let hole = ranges(&[(1, 3), (2, 4)]);
        let rest = subtract(&rect, &hole);
        assert_eq!(volume(&rest), 16 - 4);
        for piece in &rest {
            assert!(intersect(piece, &hole).is_none());
        }
    }

    #[test]
    fn test_subtract_whole_rect_leaves_nothing() {
        let rect = ranges(&[(2, 5)]);
        assert!(subtract(&rect, &rect).is_empty());
    }

    #[test]
    fn test_intersect_disjoint() {
        assert!(intersect(&ranges(&[(0, 2)]), &ranges(&[(2, 4)])).is_none());
        assert_eq!(
            intersect(&ranges(&[(0, 3)]), &ranges(&[(2, 4)])),
            Some(ranges(&[(2, 3)]))
        );
    }
}
