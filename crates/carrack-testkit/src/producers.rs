//! Slow producers for event-ordering tests

use carrack_core::{Element, HostArray, Result};
use carrack_effects::{Device, Stream};
use carrack_transfer::AsyncHandle;
use std::time::Duration;

/// Fill a fresh array with `values` after stalling `stream` for `delay`
///
/// Returns immediately. The handle's event signals once the fill has run, so
/// anything that reads the buffer without waiting sees uninitialized bytes.
pub fn delayed_fill<T: Element>(
    device: &Device,
    stream: &Stream,
    shape: &[usize],
    values: &[T],
    delay: Duration,
) -> Result<AsyncHandle> {
    let bytes = HostArray::from_slice(shape, values)?.into_bytes();
    let array = device.empty(T::DTYPE, shape)?;
    stream.enqueue_delay(delay)?;
    let target = array.clone();
    stream.enqueue("delayed fill", move || target.write_bytes(&bytes))?;
    let ready = stream.record()?;
    Ok(AsyncHandle::new(array, ready))
}
