//! Property test strategies for Carrack types

use carrack_core::{element_count, ElementType, HostArray, IndexRange, Region};
use proptest::prelude::*;

pub use proptest;

/// Element types that have a wire representation
pub fn arb_wire_element_type() -> impl Strategy<Value = ElementType> {
    prop_oneof![
        Just(ElementType::Int8),
        Just(ElementType::UInt8),
        Just(ElementType::Float16),
        Just(ElementType::Int32),
        Just(ElementType::UInt32),
        Just(ElementType::Float32),
        Just(ElementType::Int64),
        Just(ElementType::UInt64),
        Just(ElementType::Float64),
        Just(ElementType::Complex64),
        Just(ElementType::Complex128),
    ]
}

/// Element types the wire cannot carry
pub fn arb_unwired_element_type() -> impl Strategy<Value = ElementType> {
    prop_oneof![
        Just(ElementType::Bool),
        Just(ElementType::Int16),
        Just(ElementType::UInt16),
        (1u16..64).prop_map(ElementType::Opaque),
    ]
}

/// Shapes with up to `max_dims` dimensions of extent `0..=max_extent`
pub fn arb_shape(max_dims: usize, max_extent: usize) -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(0..=max_extent, 0..=max_dims)
}

/// Host array of a wire-representable type filled with arbitrary bytes
pub fn arb_host_array() -> impl Strategy<Value = HostArray> {
    (arb_wire_element_type(), arb_shape(3, 5)).prop_flat_map(|(dtype, shape)| {
        let nbytes = element_count(&shape) * dtype.size_bytes();
        proptest::collection::vec(any::<u8>(), nbytes)
            .prop_map(move |bytes| HostArray::new(dtype, shape.clone(), bytes).unwrap())
    })
}

/// Region inside `shape`; ranges may be empty
pub fn arb_region(shape: Vec<usize>) -> impl Strategy<Value = Region> {
    shape
        .into_iter()
        .map(|extent| {
            (0..=extent, 0..=extent).prop_map(|(a, b)| IndexRange::new(a.min(b), a.max(b)))
        })
        .collect::<Vec<_>>()
        .prop_map(Region::new)
}
