//! Device and peer identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordinal of a compute device with its own memory space and streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Create a device identifier from its ordinal
    pub const fn new(ordinal: u32) -> Self {
        Self(ordinal)
    }

    /// The raw device ordinal
    pub const fn ordinal(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(ordinal: u32) -> Self {
        Self(ordinal)
    }
}

/// Rank of a communicator inside one communicator set
///
/// Point-to-point sends and receives address their counterpart by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl PeerId {
    /// Create a peer identifier from a rank
    pub const fn new(rank: u32) -> Self {
        Self(rank)
    }

    /// The raw rank
    pub const fn rank(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}
