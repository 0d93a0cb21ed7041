//! Wire-level datatypes for the communication backend
//!
//! The collective library moves raw element runs tagged with a wire
//! datatype. Complex values travel as pairs of their float component.

use super::ElementType;
use crate::{CarrackError, Result};
use serde::{Deserialize, Serialize};

/// Datatype understood by the point-to-point send/receive primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireDataType {
    /// Signed 8-bit integer
    Int8,
    /// Unsigned 8-bit integer
    UInt8,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 32-bit integer
    UInt32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 64-bit integer
    UInt64,
    /// Half precision float
    Float16,
    /// Single precision float
    Float32,
    /// Double precision float
    Float64,
}

impl WireDataType {
    /// Width of one wire element in bytes
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Float16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }
}

/// Translate an element type and element count into the wire datatype and count
///
/// Complex types double the count. `Bool`, `Int16`, `UInt16` and `Opaque`
/// have no wire representation.
pub fn wire_dtype_and_count(dtype: ElementType, count: usize) -> Result<(WireDataType, usize)> {
    let wire = match dtype {
        ElementType::Int8 => WireDataType::Int8,
        ElementType::UInt8 => WireDataType::UInt8,
        ElementType::Int32 => WireDataType::Int32,
        ElementType::UInt32 => WireDataType::UInt32,
        ElementType::Int64 => WireDataType::Int64,
        ElementType::UInt64 => WireDataType::UInt64,
        ElementType::Float16 => WireDataType::Float16,
        ElementType::Float32 | ElementType::Complex64 => WireDataType::Float32,
        ElementType::Float64 | ElementType::Complex128 => WireDataType::Float64,
        ElementType::Bool | ElementType::Int16 | ElementType::UInt16 | ElementType::Opaque(_) => {
            return Err(CarrackError::unsupported_dtype(dtype, "wire transfer"));
        }
    };

    let count = if dtype.is_complex() {
        count.checked_mul(2).ok_or_else(|| {
            CarrackError::invalid(format!("element count {count} overflows the wire count"))
        })?
    } else {
        count
    };

    Ok((wire, count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_types_keep_count() {
        assert_eq!(
            wire_dtype_and_count(ElementType::Float32, 10).unwrap(),
            (WireDataType::Float32, 10)
        );
        assert_eq!(
            wire_dtype_and_count(ElementType::UInt8, 0).unwrap(),
            (WireDataType::UInt8, 0)
        );
    }

    #[test]
    fn test_complex_doubles_count() {
        assert_eq!(
            wire_dtype_and_count(ElementType::Complex64, 6).unwrap(),
            (WireDataType::Float32, 12)
        );
        assert_eq!(
            wire_dtype_and_count(ElementType::Complex128, 3).unwrap(),
            (WireDataType::Float64, 6)
        );
    }

    #[test]
    fn test_unsupported_types() {
        for dtype in [
            ElementType::Bool,
            ElementType::Int16,
            ElementType::UInt16,
            ElementType::Opaque(8),
        ] {
            let err = wire_dtype_and_count(dtype, 4).unwrap_err();
            assert!(matches!(err, CarrackError::UnsupportedElementType { .. }));
        }
    }

    #[test]
    fn test_wire_bytes_match_element_bytes() {
        for dtype in [
            ElementType::Int8,
            ElementType::Float16,
            ElementType::UInt32,
            ElementType::Float64,
            ElementType::Complex64,
            ElementType::Complex128,
        ] {
            let (wire, count) = wire_dtype_and_count(dtype, 5).unwrap();
            assert_eq!(wire.size_bytes() * count, dtype.size_bytes() * 5);
        }
    }
}
