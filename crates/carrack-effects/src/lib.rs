//! Carrack Effects - device runtime and communication primitives
//!
//! This crate implements the capabilities the transfer layer consumes:
//!
//! - `device`: per-device memory pools, strided arrays, ordered execution
//!   streams and completion events, all driven by tokio tasks
//! - `collective`: an in-process collective library with point-to-point
//!   send/receive and group scopes
//! - `capsule`: single-consumption export of device buffers
//! - `logging`: tracing subscriber setup
//!
//! Streams are tokio tasks, so every runtime object must be created from
//! inside a tokio runtime.

#![forbid(unsafe_code)]

pub mod capsule;
pub mod collective;
pub mod device;
pub mod logging;

pub use capsule::Capsule;
pub use collective::{CollectiveComm, CollectiveFault, CollectiveLibrary, GroupScope};
pub use device::{
    DataPtr, Device, DeviceArray, DeviceRuntime, Event, MemoryPool, PoolStats, Stream,
};
pub use logging::init_logging;
