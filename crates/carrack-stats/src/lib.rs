//! Carrack Stats - nan policies and standard scores
//!
//! Host-side helpers that operate on [`HostArray`](carrack_core::HostArray):
//!
//! - [`NanPolicy`] and [`contains_nan`]: validate a policy and detect nans,
//!   falling back to `omit` for element types that cannot be tested
//! - [`zmap`] and [`zscore`]: standard scores against the mean and standard
//!   deviation of a comparison array, per axis or over the whole array
//!
//! Results are always `Float64` arrays.

#![forbid(unsafe_code)]

pub mod nan_policy;
pub mod zscore;

pub use nan_policy::{contains_nan, NanCheck, NanPolicy};
pub use zscore::{zmap, zscore};
