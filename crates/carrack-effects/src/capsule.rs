//! Single-use tensor exchange capsules
//!
//! A capsule wraps an exported device array. Until it is consumed, the capsule
//! itself keeps the buffer alive. Consuming it hands the array (and with it the
//! buffer's lifetime) to the importer; a capsule can be consumed once.

use crate::device::DeviceArray;
use carrack_core::{CarrackError, DeviceId, ElementType, Result};
use parking_lot::Mutex;
use std::fmt;

/// Name carried by a capsule that has not been consumed
pub const CAPSULE_NAME: &str = "dltensor";

/// Name carried by a capsule after consumption
pub const USED_CAPSULE_NAME: &str = "used_dltensor";

/// Exported device buffer
pub struct Capsule {
    slot: Mutex<Option<DeviceArray>>,
    dtype: ElementType,
    shape: Vec<usize>,
    device: DeviceId,
}

impl Capsule {
    pub(crate) fn new(array: DeviceArray) -> Self {
        Self {
            dtype: array.dtype(),
            shape: array.shape().to_vec(),
            device: array.device(),
            slot: Mutex::new(Some(array)),
        }
    }

    /// `dltensor`, or `used_dltensor` once consumed
    pub fn name(&self) -> &'static str {
        if self.is_consumed() {
            USED_CAPSULE_NAME
        } else {
            CAPSULE_NAME
        }
    }

    /// Whether the array has been taken
    pub fn is_consumed(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Element type of the exported array
    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    /// Shape of the exported array
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Device holding the exported buffer
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Take the array out of the capsule
    pub fn consume(&self) -> Result<DeviceArray> {
        self.slot.lock().take().ok_or_else(|| {
            CarrackError::ownership_violation("tensor capsule was consumed multiple times")
        })
    }
}

impl fmt::Debug for Capsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capsule")
            .field("name", &self.name())
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("device", &self.device)
            .finish()
    }
}
