//! Core Carrack types
//!
//! Identifiers, element types, the wire datatype translation, index regions,
//! row-major layout helpers and host-resident arrays.

pub mod element;
pub mod host;
pub mod identifiers;
pub mod layout;
pub mod region;
pub mod wire;

pub use element::{Element, ElementType};
pub use host::HostArray;
pub use identifiers::{DeviceId, PeerId};
pub use layout::{contiguous_strides, element_count, for_each_offset};
pub use region::{IndexRange, Region};
pub use wire::{wire_dtype_and_count, WireDataType};
