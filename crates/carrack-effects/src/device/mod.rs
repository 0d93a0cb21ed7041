//! Simulated device runtime
//!
//! Devices own a memory pool and a default stream. Streams execute enqueued
//! commands in order on a tokio task; events mark points in a stream and let
//! other streams (or the host) wait for them.

mod array;
mod event;
mod memory;
mod runtime;
mod stream;

pub use array::{DataPtr, DeviceArray};
pub use event::Event;
pub use memory::{Allocation, MemoryPool, PoolStats};
pub use runtime::{Device, DeviceRuntime};
pub use stream::Stream;

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique id for buffers, streams and events
pub(crate) fn next_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}
