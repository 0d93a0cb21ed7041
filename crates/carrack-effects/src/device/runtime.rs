//! Devices and the runtime that owns them

use super::array::DeviceArray;
use super::memory::MemoryPool;
use super::stream::Stream;
use crate::collective::CollectiveLibrary;
use carrack_core::{CarrackError, DeviceId, ElementType, HostArray, Result, RuntimeConfig};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One simulated device: a memory pool plus its streams
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    pool: Arc<MemoryPool>,
    default_stream: Stream,
    current: Mutex<Option<Stream>>,
}

impl Device {
    fn new(id: DeviceId, capacity: usize) -> Result<Self> {
        Ok(Self {
            id,
            pool: MemoryPool::new(id, capacity),
            default_stream: Stream::spawn(id)?,
            current: Mutex::new(None),
        })
    }

    /// Device id
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Memory pool of this device
    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    /// Stream used when no other stream has been made current
    pub fn default_stream(&self) -> &Stream {
        &self.default_stream
    }

    /// Start an additional stream on this device
    pub fn create_stream(&self) -> Result<Stream> {
        Stream::spawn(self.id)
    }

    /// The stream new work goes to
    pub fn current_stream(&self) -> Stream {
        self.current
            .lock()
            .clone()
            .unwrap_or_else(|| self.default_stream.clone())
    }

    /// Make `stream` current; `None` restores the default stream
    pub fn set_current_stream(&self, stream: Option<Stream>) -> Result<()> {
        if let Some(stream) = &stream {
            if stream.device() != self.id {
                return Err(CarrackError::invalid(format!(
                    "stream of {} cannot be current on {}",
                    stream.device(),
                    self.id
                )));
            }
        }
        *self.current.lock() = stream;
        Ok(())
    }

    /// Allocate an uninitialized array
    pub fn empty(&self, dtype: ElementType, shape: &[usize]) -> Result<DeviceArray> {
        DeviceArray::allocate(&self.pool, dtype, shape)
    }

    /// Copy a host array onto the device
    ///
    /// Synchronous: the returned array is valid immediately.
    pub fn upload(&self, host: &HostArray) -> Result<DeviceArray> {
        let array = self.empty(host.dtype(), host.shape())?;
        array.write_bytes(host.bytes())?;
        Ok(array)
    }

    /// Wait for the default and current streams to drain
    pub async fn synchronize(&self) -> Result<()> {
        let current = self.current.lock().clone();
        self.default_stream.synchronize().await?;
        if let Some(stream) = current {
            stream.synchronize().await?;
        }
        Ok(())
    }
}

/// The set of devices visible to this process
#[derive(Debug)]
pub struct DeviceRuntime {
    devices: BTreeMap<DeviceId, Arc<Device>>,
    collective: Option<Arc<CollectiveLibrary>>,
}

impl DeviceRuntime {
    /// Bring up `config.device_count` devices
    ///
    /// Must run inside a tokio runtime; every device starts a stream worker.
    pub fn new(config: &RuntimeConfig) -> Result<Arc<Self>> {
        if config.device_count == 0 {
            return Err(CarrackError::config("runtime needs at least one device"));
        }
        let mut devices = BTreeMap::new();
        for ordinal in 0..config.device_count {
            let id = DeviceId(ordinal);
            devices.insert(id, Arc::new(Device::new(id, config.memory_per_device)?));
        }
        let collective = config
            .collective_available
            .then(|| Arc::new(CollectiveLibrary::new()));

        tracing::info!(
            devices = config.device_count,
            memory_per_device = config.memory_per_device,
            collective = config.collective_available,
            "device runtime initialized"
        );
        Ok(Arc::new(Self {
            devices,
            collective,
        }))
    }

    /// Look up a device
    pub fn device(&self, id: DeviceId) -> Result<Arc<Device>> {
        self.devices
            .get(&id)
            .cloned()
            .ok_or_else(|| CarrackError::invalid(format!("no such device: {id}")))
    }

    /// Ids of every device, ascending
    pub fn devices(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    /// Number of devices
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Collective library, when this system provides one
    pub fn collective(&self) -> Option<Arc<CollectiveLibrary>> {
        self.collective.clone()
    }

    /// Wait for every device to drain
    pub async fn synchronize_all(&self) -> Result<()> {
        for device in self.devices.values() {
            device.synchronize().await?;
        }
        Ok(())
    }
}
