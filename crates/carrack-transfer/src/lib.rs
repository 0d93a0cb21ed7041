//! Carrack Transfer - asynchronous multi-device data movement
//!
//! The pieces, leaves first:
//!
//! - [`AsyncHandle`]: a device buffer plus the event that marks it valid
//! - [`CommunicatorRegistry`]: one communicator per participating device,
//!   backed by the collective library or by plain local copies
//! - [`TransferEngine`]: one asynchronous device-to-device copy at a time
//! - [`PartialUpdate`]: queued region writes applied in submission order
//! - [`DistributedArray`]: per-device chunks kept eventually consistent
//!
//! Nothing here blocks the calling task except the explicit `wait`,
//! `to_host` and `synchronize` futures. Ordering between devices is expressed
//! only through events.
//!
//! ```ignore
//! let runtime = DeviceRuntime::new(&config.runtime)?;
//! let registry = CommunicatorRegistry::create(&runtime, &runtime.devices(), &config.transfer)?;
//! let engine = TransferEngine::new(Arc::new(registry));
//! let moved = engine.transfer_to(&handle, DeviceId(1))?;
//! let host = moved.to_host().await?;
//! ```

#![forbid(unsafe_code)]

pub mod backend;
pub mod distributed;
pub mod engine;
pub mod handle;
pub mod registry;
pub mod update;

pub use backend::{
    BackendKind, CollectiveBackend, CommunicatorHandle, Endpoint, LocalCopyBackend,
    TransferBackend, TransferRequest,
};
pub use distributed::DistributedArray;
pub use engine::{PendingTransfer, TransferEngine, TransferStats};
pub use handle::{AsyncHandle, Retained};
pub use registry::CommunicatorRegistry;
pub use update::{apply_updates, Combine, CombineFn, PartialUpdate, ReduceOp, UpdateMode};
