//! Multi-device fixtures
//!
//! Fixtures start stream workers, so build them inside a tokio runtime.

use carrack_core::{
    BackendPreference, DeviceId, Element, HostArray, Result, RuntimeConfig, TransferConfig,
};
use carrack_effects::{CollectiveLibrary, Device, DeviceRuntime};
use carrack_transfer::{AsyncHandle, CommunicatorRegistry, TransferEngine};
use std::sync::Arc;

/// Runtime plus an engine over every device
#[derive(Debug, Clone)]
pub struct TransferFixture {
    runtime: Arc<DeviceRuntime>,
    engine: Arc<TransferEngine>,
}

impl TransferFixture {
    /// `devices` devices with the default backend selection
    pub fn new(devices: u32) -> Self {
        Self::builder().devices(devices).build().unwrap()
    }

    /// Start a builder
    pub fn builder() -> TransferFixtureBuilder {
        TransferFixtureBuilder::default()
    }

    /// Device runtime
    pub fn runtime(&self) -> &Arc<DeviceRuntime> {
        &self.runtime
    }

    /// Transfer engine
    pub fn engine(&self) -> &Arc<TransferEngine> {
        &self.engine
    }

    /// Registry behind the engine
    pub fn registry(&self) -> &Arc<CommunicatorRegistry> {
        self.engine.registry()
    }

    /// Device by ordinal
    pub fn device(&self, id: DeviceId) -> Arc<Device> {
        self.runtime.device(id).unwrap()
    }

    /// Collective library; panics when the fixture was built without one
    pub fn library(&self) -> Arc<CollectiveLibrary> {
        self.runtime.collective().unwrap()
    }

    /// Upload typed values and wrap them in an already-ready handle
    pub fn upload<T: Element>(&self, device: DeviceId, shape: &[usize], values: &[T]) -> AsyncHandle {
        self.upload_host(device, &HostArray::from_slice(shape, values).unwrap())
    }

    /// Upload a host array and wrap it in an already-ready handle
    pub fn upload_host(&self, device: DeviceId, host: &HostArray) -> AsyncHandle {
        AsyncHandle::completed(self.device(device).upload(host).unwrap())
    }
}

/// Builder for [`TransferFixture`]
#[derive(Debug, Clone)]
pub struct TransferFixtureBuilder {
    runtime: RuntimeConfig,
    transfer: TransferConfig,
}

impl Default for TransferFixtureBuilder {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::testing(2),
            transfer: TransferConfig::default(),
        }
    }
}

impl TransferFixtureBuilder {
    /// Number of devices
    pub fn devices(mut self, count: u32) -> Self {
        self.runtime.device_count = count;
        self
    }

    /// Pool capacity of each device
    pub fn memory_per_device(mut self, bytes: usize) -> Self {
        self.runtime.memory_per_device = bytes;
        self
    }

    /// Backend selection
    pub fn backend(mut self, backend: BackendPreference) -> Self {
        self.transfer.backend = backend;
        self
    }

    /// Pretend the system has no collective library
    pub fn without_collective(mut self) -> Self {
        self.runtime.collective_available = false;
        self
    }

    /// Bring up the runtime and a registry over all of its devices
    pub fn build(self) -> Result<TransferFixture> {
        let runtime = DeviceRuntime::new(&self.runtime)?;
        let registry = CommunicatorRegistry::create(&runtime, &runtime.devices(), &self.transfer)?;
        Ok(TransferFixture {
            runtime,
            engine: Arc::new(TransferEngine::new(Arc::new(registry))),
        })
    }
}
