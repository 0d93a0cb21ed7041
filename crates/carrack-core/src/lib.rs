//! Carrack Core - Foundation types for the multi-device transfer layer
//!
//! This crate holds the pure building blocks shared by every other Carrack
//! crate. It contains no device runtime and no communication logic.
//!
//! # Contents
//!
//! - `errors`: the unified `CarrackError` and `Result` alias
//! - `types`: device/peer identifiers, element types, wire datatypes,
//!   index regions, row-major layout helpers and host arrays
//! - `config`: configuration traits and the root `Config`

#![forbid(unsafe_code)]

/// Unified error handling
pub mod errors;

/// Identifiers, element types, regions and host arrays
pub mod types;

/// Configuration traits and types
pub mod config;

// === Public API Re-exports ===

pub use errors::{CarrackError, Result};

pub use types::{
    element_count, wire_dtype_and_count, DeviceId, Element, ElementType, HostArray, IndexRange,
    PeerId, Region, WireDataType,
};

pub use config::{
    BackendPreference, CarrackConfig, Config, LoggingConfig, RuntimeConfig, TransferConfig,
};
