//! Per-device memory pool
//!
//! Accounting only: the pool tracks bytes in use against a fixed capacity and
//! caches freed blocks by size for reuse, the way a caching device allocator
//! does. Zero-byte allocations never touch the pool.

use carrack_core::{CarrackError, DeviceId, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Snapshot of pool usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Owning device
    pub device: DeviceId,
    /// Pool capacity in bytes
    pub capacity: usize,
    /// Bytes held by live allocations
    pub used_bytes: usize,
    /// Bytes held by cached free blocks
    pub cached_bytes: usize,
    /// Number of cached free blocks
    pub free_blocks: usize,
    /// Allocations served since creation
    pub allocations: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    used: usize,
    cached: BTreeMap<usize, usize>,
    cached_bytes: usize,
    allocations: u64,
}

impl PoolState {
    fn free_blocks(&self) -> usize {
        self.cached.values().sum()
    }
}

/// Caching allocator for one device
#[derive(Debug)]
pub struct MemoryPool {
    device: DeviceId,
    capacity: usize,
    state: Mutex<PoolState>,
}

impl MemoryPool {
    /// Create a pool with `capacity` bytes
    pub fn new(device: DeviceId, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            device,
            capacity,
            state: Mutex::new(PoolState::default()),
        })
    }

    /// Reserve `size` bytes
    ///
    /// A cached block of the same size is reused first. When the request does
    /// not fit, the cache is released before giving up with `OutOfMemory`.
    pub fn allocate(self: &Arc<Self>, size: usize) -> Result<Allocation> {
        let mut state = self.state.lock();
        if size == 0 {
            state.allocations += 1;
            return Ok(Allocation {
                pool: Arc::clone(self),
                size,
            });
        }

        let cached = state.cached.get(&size).copied().unwrap_or(0);
        if cached > 0 {
            if cached == 1 {
                state.cached.remove(&size);
            } else {
                state.cached.insert(size, cached - 1);
            }
            state.cached_bytes -= size;
        } else {
            if state.used + state.cached_bytes + size > self.capacity {
                tracing::debug!(
                    device = %self.device,
                    cached = state.cached_bytes,
                    "releasing cached blocks to satisfy allocation"
                );
                state.cached.clear();
                state.cached_bytes = 0;
            }
            if state.used + size > self.capacity {
                let available = self.capacity - state.used;
                tracing::warn!(device = %self.device, requested = size, available, "device allocation failed");
                return Err(CarrackError::out_of_memory(self.device, size, available));
            }
        }

        state.used += size;
        state.allocations += 1;
        Ok(Allocation {
            pool: Arc::clone(self),
            size,
        })
    }

    fn release(&self, size: usize) {
        if size == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.used -= size;
        *state.cached.entry(size).or_insert(0) += 1;
        state.cached_bytes += size;
    }

    /// Owning device
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Pool capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes held by live allocations
    pub fn used_bytes(&self) -> usize {
        self.state.lock().used
    }

    /// Bytes held by cached free blocks
    pub fn cached_bytes(&self) -> usize {
        self.state.lock().cached_bytes
    }

    /// Number of cached free blocks
    pub fn n_free_blocks(&self) -> usize {
        self.state.lock().free_blocks()
    }

    /// Drop every cached block
    pub fn free_all_blocks(&self) {
        let mut state = self.state.lock();
        state.cached.clear();
        state.cached_bytes = 0;
    }

    /// Usage snapshot
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            device: self.device,
            capacity: self.capacity,
            used_bytes: state.used,
            cached_bytes: state.cached_bytes,
            free_blocks: state.free_blocks(),
            allocations: state.allocations,
        }
    }
}

/// Live reservation; returns its block to the pool cache when dropped
#[derive(Debug)]
pub struct Allocation {
    pool: Arc<MemoryPool>,
    size: usize,
}

impl Allocation {
    /// Reserved bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Pool the reservation came from
    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.pool.release(self.size);
    }
}
