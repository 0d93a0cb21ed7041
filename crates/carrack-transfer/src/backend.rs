//! Communicator backends
//!
//! A backend creates the per-device communicators and carries out the data
//! movement of a cross-device transfer. Two implementations exist: one built
//! on the collective library, and a degraded one that issues plain
//! device-to-device copies when no collective library is available.

use crate::handle::{AsyncHandle, Retained};
use carrack_core::{wire_dtype_and_count, CarrackError, DeviceId, PeerId, Result};
use carrack_effects::{CollectiveComm, CollectiveLibrary, Device, DeviceRuntime, Stream};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Which backend a registry uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Paired send/receive through the collective library
    Collective,
    /// Plain copies through the destination stream
    LocalCopy,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Collective => "collective",
            Self::LocalCopy => "local_copy",
        })
    }
}

/// Backend-specific part of a communicator
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// Collective library communicator
    Collective(CollectiveComm),
    /// No-op tag; the device id is all the local backend needs
    Tag,
}

/// Communication endpoint bound to one device
#[derive(Debug, Clone)]
pub struct CommunicatorHandle {
    device: DeviceId,
    peer: PeerId,
    endpoint: Endpoint,
}

impl CommunicatorHandle {
    /// Bind `endpoint` to `device` with rank `peer`
    pub fn new(device: DeviceId, peer: PeerId, endpoint: Endpoint) -> Self {
        Self {
            device,
            peer,
            endpoint,
        }
    }

    /// Bound device
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Peer id other communicators address this one by
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Backend endpoint
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Collective communicator, when the collective backend created this handle
    pub fn collective(&self) -> Option<&CollectiveComm> {
        match &self.endpoint {
            Endpoint::Collective(comm) => Some(comm),
            Endpoint::Tag => None,
        }
    }
}

/// Arguments of one cross-device transfer
///
/// Preconditions are checked by the engine before a backend sees a request.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    /// Communicator of the source device
    pub src_comm: &'a CommunicatorHandle,
    /// Stream ordering the source side
    pub src_stream: &'a Stream,
    /// Data to move
    pub src: &'a AsyncHandle,
    /// Communicator of the destination device
    pub dst_comm: &'a CommunicatorHandle,
    /// Stream ordering the destination side
    pub dst_stream: &'a Stream,
    /// Destination device
    pub dst_device: &'a Device,
}

/// Strategy for creating communicators and moving data between devices
pub trait TransferBackend: Send + Sync + fmt::Debug {
    /// Backend identity
    fn kind(&self) -> BackendKind;

    /// Create one communicator per device, all or nothing
    fn create_communicators(
        &self,
        runtime: &DeviceRuntime,
        devices: &[DeviceId],
    ) -> Result<Vec<CommunicatorHandle>>;

    /// Move `request.src` to the destination device
    fn transfer(&self, request: &TransferRequest<'_>) -> Result<AsyncHandle>;

    /// Release communicators created by this backend
    fn teardown(&self, _communicators: &[CommunicatorHandle]) {}
}

/// Reject empty, duplicated or unknown device lists
pub(crate) fn validate_devices(runtime: &DeviceRuntime, devices: &[DeviceId]) -> Result<()> {
    if devices.is_empty() {
        return Err(CarrackError::communication_init("no devices given"));
    }
    let mut seen = BTreeSet::new();
    for &device in devices {
        if !seen.insert(device) {
            return Err(CarrackError::communication_init(format!(
                "{device} listed more than once"
            )));
        }
        runtime
            .device(device)
            .map_err(|_| CarrackError::communication_init(format!("{device} does not exist")))?;
    }
    Ok(())
}

/// Backend built on the collective library
#[derive(Debug, Clone)]
pub struct CollectiveBackend {
    library: Arc<CollectiveLibrary>,
}

impl CollectiveBackend {
    /// Use `library` for communicators and transfers
    pub fn new(library: Arc<CollectiveLibrary>) -> Self {
        Self { library }
    }
}

fn collective_endpoint<'a>(comm: &'a CommunicatorHandle, side: &str) -> Result<&'a CollectiveComm> {
    comm.collective().ok_or_else(|| {
        CarrackError::invalid(format!(
            "{side} communicator of {} was not created by the collective backend",
            comm.device()
        ))
    })
}

impl TransferBackend for CollectiveBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Collective
    }

    fn create_communicators(
        &self,
        runtime: &DeviceRuntime,
        devices: &[DeviceId],
    ) -> Result<Vec<CommunicatorHandle>> {
        let comms = self.library.init_all(runtime, devices)?;
        Ok(comms
            .into_iter()
            .map(|comm| CommunicatorHandle::new(comm.device_id(), comm.rank(), Endpoint::Collective(comm)))
            .collect())
    }

    fn transfer(&self, request: &TransferRequest<'_>) -> Result<AsyncHandle> {
        let src = request.src;
        let (dtype, count) = wire_dtype_and_count(src.dtype(), src.array().size())?;
        let src_comm = collective_endpoint(request.src_comm, "source")?;
        let dst_comm = collective_endpoint(request.dst_comm, "destination")?;

        request.src_stream.wait_event(src.ready())?;
        let src_data = src.array().ascontiguous_on(request.src_stream)?;
        let dst = request.dst_device.empty(src.dtype(), src.shape())?;

        let mut group = self.library.group();
        group.send(
            src_comm,
            &src_data,
            count,
            dtype,
            request.dst_comm.peer(),
            request.src_stream,
        );
        group.recv(
            dst_comm,
            &dst,
            count,
            dtype,
            request.src_comm.peer(),
            request.dst_stream,
        );
        group.finish()?;

        let ready = request.dst_stream.record()?;
        Ok(AsyncHandle::with_retained(
            dst,
            ready,
            vec![Retained::Handle(src.clone()), Retained::Array(src_data)],
        ))
    }

    fn teardown(&self, communicators: &[CommunicatorHandle]) {
        for comm in communicators.iter().filter_map(CommunicatorHandle::collective) {
            comm.abort();
        }
    }
}

/// Degraded backend: device-to-device copies on the destination stream
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCopyBackend;

impl TransferBackend for LocalCopyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalCopy
    }

    fn create_communicators(
        &self,
        runtime: &DeviceRuntime,
        devices: &[DeviceId],
    ) -> Result<Vec<CommunicatorHandle>> {
        validate_devices(runtime, devices)?;
        Ok((0u32..)
            .zip(devices)
            .map(|(rank, &device)| CommunicatorHandle::new(device, PeerId(rank), Endpoint::Tag))
            .collect())
    }

    fn transfer(&self, request: &TransferRequest<'_>) -> Result<AsyncHandle> {
        let src = request.src;
        request.dst_stream.wait_event(src.ready())?;
        let dst = src.array().copy_to(request.dst_device, request.dst_stream)?;
        let ready = request.dst_stream.record()?;
        Ok(AsyncHandle::with_retained(
            dst,
            ready,
            vec![Retained::Array(src.array().clone())],
        ))
    }
}
