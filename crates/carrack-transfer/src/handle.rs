//! Device buffers paired with their readiness event

use carrack_core::{CarrackError, DeviceId, ElementType, HostArray, Result};
use carrack_effects::{Capsule, Device, DeviceArray, Event, Stream};
use std::sync::Arc;

/// Something a handle keeps alive for an in-flight operation
#[derive(Debug, Clone)]
pub enum Retained {
    /// An antecedent handle (its buffer, event and own retain chain)
    Handle(AsyncHandle),
    /// A bare intermediate buffer
    Array(DeviceArray),
}

/// Device array whose contents are valid once `ready` signals
///
/// Handles are immutable values; every operation that changes data returns a
/// new handle. Readers must order themselves after `ready`, either with
/// [`Stream::wait_event`] or with one of the blocking waits below.
#[derive(Debug, Clone)]
pub struct AsyncHandle {
    array: DeviceArray,
    ready: Event,
    retain: Arc<[Retained]>,
}

impl AsyncHandle {
    /// Pair `array` with the event that marks it valid
    pub fn new(array: DeviceArray, ready: Event) -> Self {
        Self::with_retained(array, ready, Vec::new())
    }

    /// Pair `array` with `ready`, keeping `retain` alive alongside it
    pub fn with_retained(array: DeviceArray, ready: Event, retain: Vec<Retained>) -> Self {
        Self {
            array,
            ready,
            retain: retain.into(),
        }
    }

    /// Handle for data that is already valid
    pub fn completed(array: DeviceArray) -> Self {
        Self::new(array, Event::completed())
    }

    /// The buffer
    pub fn array(&self) -> &DeviceArray {
        &self.array
    }

    /// Readiness event
    pub fn ready(&self) -> &Event {
        &self.ready
    }

    /// Antecedents kept alive by this handle
    pub fn retained(&self) -> &[Retained] {
        &self.retain
    }

    /// Device holding the buffer
    pub fn device(&self) -> DeviceId {
        self.array.device()
    }

    /// Element type
    pub fn dtype(&self) -> ElementType {
        self.array.dtype()
    }

    /// Shape
    pub fn shape(&self) -> &[usize] {
        self.array.shape()
    }

    /// Whether `ready` has signaled
    pub fn is_ready(&self) -> bool {
        self.ready.query()
    }

    /// Whether both handles view the same buffer
    pub fn same_memory(&self, other: &AsyncHandle) -> bool {
        self.array.same_memory(&other.array)
    }

    /// Duplicate the buffer on the device's current stream
    pub fn copy(&self, device: &Device) -> Result<AsyncHandle> {
        self.copy_on(&device.current_stream())
    }

    /// Duplicate the buffer on `stream` without blocking
    ///
    /// The stream first waits for `ready`. Afterwards `ready` is re-recorded
    /// on `stream`, so later writers of this buffer also wait for the copy to
    /// have read it.
    pub fn copy_on(&self, stream: &Stream) -> Result<AsyncHandle> {
        if stream.device() != self.device() {
            return Err(CarrackError::invalid(format!(
                "cannot copy a buffer on {} with a stream of {}",
                self.device(),
                stream.device()
            )));
        }
        stream.wait_event(&self.ready)?;
        let array = self.array.copy_on(stream)?;
        stream.record_event(&self.ready)?;
        let ready = stream.record()?;
        Ok(Self::with_retained(
            array,
            ready,
            vec![Retained::Handle(self.clone())],
        ))
    }

    /// Block the calling task until the contents are valid
    pub async fn wait(&self) -> Result<()> {
        self.ready.synchronize().await
    }

    /// Wait, then download the contents
    pub async fn to_host(&self) -> Result<HostArray> {
        self.wait().await?;
        HostArray::new(
            self.dtype(),
            self.shape().to_vec(),
            self.array.read_bytes(),
        )
    }

    /// Drop the retain chain once `ready` has signaled
    ///
    /// Until then the handle is returned unchanged.
    pub fn compact(&self) -> AsyncHandle {
        if self.retain.is_empty() || !self.ready.query() {
            return self.clone();
        }
        Self::new(self.array.clone(), self.ready.clone())
    }

    /// Export the buffer for a consumer ordered on `consumer`
    pub fn export(&self, consumer: &Stream) -> Result<Capsule> {
        consumer.wait_event(&self.ready)?;
        Ok(self.array.to_capsule())
    }
}
