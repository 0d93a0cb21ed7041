//! Array element types
//!
//! `ElementType` is the semantic type of one array element. `Element` maps
//! Rust scalars onto it and moves values to and from native-endian bytes.

use half::f16;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic element type of a device or host array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// One-byte boolean
    Bool,
    /// Signed 8-bit integer
    Int8,
    /// Unsigned 8-bit integer
    UInt8,
    /// Signed 16-bit integer
    Int16,
    /// Unsigned 16-bit integer
    UInt16,
    /// IEEE half precision float
    Float16,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 32-bit integer
    UInt32,
    /// IEEE single precision float
    Float32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 64-bit integer
    UInt64,
    /// IEEE double precision float
    Float64,
    /// Pair of single precision floats (real, imaginary)
    Complex64,
    /// Pair of double precision floats (real, imaginary)
    Complex128,
    /// Fixed-width record with no numeric interpretation; the payload is its width in bytes
    Opaque(u16),
}

impl ElementType {
    /// Width of one element in bytes
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 | Self::Complex64 => 8,
            Self::Complex128 => 16,
            Self::Opaque(width) => width as usize,
        }
    }

    /// Real floating point types
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float16 | Self::Float32 | Self::Float64)
    }

    /// Complex floating point types
    pub const fn is_complex(self) -> bool {
        matches!(self, Self::Complex64 | Self::Complex128)
    }

    /// Signed and unsigned integer types
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::UInt8
                | Self::Int16
                | Self::UInt16
                | Self::Int32
                | Self::UInt32
                | Self::Int64
                | Self::UInt64
        )
    }

    /// Whether element-wise nan testing is defined for this type
    pub const fn supports_nan_check(self) -> bool {
        !matches!(self, Self::Opaque(_))
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::UInt8 => "uint8",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Float16 => "float16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Float32 => "float32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float64 => "float64",
            Self::Complex64 => "complex64",
            Self::Complex128 => "complex128",
            Self::Opaque(width) => return write!(f, "opaque{width}"),
        };
        f.write_str(name)
    }
}

/// A Rust scalar that can live inside a Carrack array
pub trait Element: Copy + Send + Sync + PartialEq + fmt::Debug + 'static {
    /// Element type tag for this scalar
    const DTYPE: ElementType;

    /// Write the native-endian representation into `out`
    ///
    /// `out` must be exactly `DTYPE.size_bytes()` long.
    fn write_bytes(self, out: &mut [u8]);

    /// Read a value from its native-endian representation
    fn read_bytes(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const DTYPE: ElementType = ElementType::$dtype;

                fn write_bytes(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_ne_bytes());
                }

                fn read_bytes(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_element!(
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    f32 => Float32,
    i64 => Int64,
    u64 => UInt64,
    f64 => Float64,
);

impl Element for bool {
    const DTYPE: ElementType = ElementType::Bool;

    fn write_bytes(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    fn read_bytes(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

impl Element for f16 {
    const DTYPE: ElementType = ElementType::Float16;

    fn write_bytes(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_bits().to_ne_bytes());
    }

    fn read_bytes(bytes: &[u8]) -> Self {
        f16::from_bits(u16::read_bytes(bytes))
    }
}
