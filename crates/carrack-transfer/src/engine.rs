//! Cross-device transfer engine

use crate::backend::{CommunicatorHandle, TransferRequest};
use crate::handle::AsyncHandle;
use crate::registry::CommunicatorRegistry;
use crate::update::PartialUpdate;
use carrack_core::{CarrackError, DeviceId, Region, Result};
use carrack_effects::{Device, DeviceRuntime, Stream};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Counters kept by a [`TransferEngine`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    /// Successful transfers, including same-device ones
    pub transfers: u64,
    /// Transfers served by aliasing the source
    pub fast_path: u64,
    /// Bytes moved between devices
    pub bytes_moved: u64,
    /// Transfers that returned an error
    pub failures: u64,
}

/// A payload waiting to be moved to the device whose chunk it updates
#[derive(Debug, Clone)]
pub struct PendingTransfer {
    /// Payload, on any device
    pub data: AsyncHandle,
    /// Target region in the destination chunk's coordinates
    pub region: Region,
    /// Destination device
    pub target: DeviceId,
}

/// Issues asynchronous copies through a registry's backend
#[derive(Debug)]
pub struct TransferEngine {
    registry: Arc<CommunicatorRegistry>,
    stats: Mutex<TransferStats>,
}

impl TransferEngine {
    /// Engine over `registry`
    pub fn new(registry: Arc<CommunicatorRegistry>) -> Self {
        Self {
            registry,
            stats: Mutex::new(TransferStats::default()),
        }
    }

    /// Registry the engine transfers through
    pub fn registry(&self) -> &Arc<CommunicatorRegistry> {
        &self.registry
    }

    /// Runtime of the registry's devices
    pub fn runtime(&self) -> &Arc<DeviceRuntime> {
        self.registry.runtime()
    }

    /// Copy `src` to `dst_device` without blocking the caller
    ///
    /// Same-device transfers alias the source handle. Otherwise the source
    /// side is ordered on `src_stream`, the destination side on `dst_stream`,
    /// and the returned handle becomes ready once the data has landed. On
    /// error no handle is returned.
    pub fn transfer(
        &self,
        src_comm: &CommunicatorHandle,
        src_stream: &Stream,
        src: &AsyncHandle,
        dst_comm: &CommunicatorHandle,
        dst_stream: &Stream,
        dst_device: &Device,
    ) -> Result<AsyncHandle> {
        check_binding("source communicator", src_comm.device(), src.device())?;
        check_binding("source stream", src_stream.device(), src.device())?;
        check_binding("destination communicator", dst_comm.device(), dst_device.id())?;
        check_binding("destination stream", dst_stream.device(), dst_device.id())?;

        if src.device() == dst_device.id() {
            let mut stats = self.stats.lock();
            stats.transfers += 1;
            stats.fast_path += 1;
            tracing::trace!(device = %src.device(), "same-device transfer aliased");
            return Ok(src.clone());
        }

        let request = TransferRequest {
            src_comm,
            src_stream,
            src,
            dst_comm,
            dst_stream,
            dst_device,
        };
        let backend = self.registry.backend();
        match backend.transfer(&request) {
            Ok(handle) => {
                let bytes = src.array().nbytes();
                let mut stats = self.stats.lock();
                stats.transfers += 1;
                stats.bytes_moved += bytes as u64;
                tracing::debug!(
                    src = %src.device(),
                    dst = %dst_device.id(),
                    bytes,
                    backend = %backend.kind(),
                    "transfer enqueued"
                );
                Ok(handle)
            }
            Err(err) => {
                self.stats.lock().failures += 1;
                tracing::warn!(
                    src = %src.device(),
                    dst = %dst_device.id(),
                    backend = %backend.kind(),
                    error = %err,
                    "transfer failed"
                );
                Err(err)
            }
        }
    }

    /// Copy `src` to `dst` using the registry's communicators and each
    /// device's current stream
    pub fn transfer_to(&self, src: &AsyncHandle, dst: DeviceId) -> Result<AsyncHandle> {
        let runtime = self.runtime();
        let src_device = runtime.device(src.device())?;
        let dst_device = runtime.device(dst)?;
        self.transfer(
            self.registry.communicator(src.device())?,
            &src_device.current_stream(),
            src,
            self.registry.communicator(dst)?,
            &dst_device.current_stream(),
            &dst_device,
        )
    }

    /// Move every pending payload to its target device, in order
    ///
    /// Stops at the first failure; transfers already issued stay in flight.
    pub fn drain(&self, pending: Vec<PendingTransfer>) -> Result<Vec<(DeviceId, PartialUpdate)>> {
        pending
            .into_iter()
            .map(|item| {
                let data = self.transfer_to(&item.data, item.target)?;
                Ok((item.target, PartialUpdate::new(data, item.region)))
            })
            .collect()
    }

    /// Counter snapshot
    pub fn stats(&self) -> TransferStats {
        *self.stats.lock()
    }
}

fn check_binding(what: &str, bound: DeviceId, expected: DeviceId) -> Result<()> {
    if bound != expected {
        return Err(CarrackError::invalid(format!(
            "{what} is bound to {bound}, expected {expected}"
        )));
    }
    Ok(())
}
