//! Nan policies and nan detection

use carrack_core::{CarrackError, Element, ElementType, HostArray, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How nan values in an input are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NanPolicy {
    /// Nans flow through to the result
    #[default]
    Propagate,
    /// Nans are an error
    Raise,
    /// Nans are ignored
    Omit,
}

impl NanPolicy {
    /// Accepted spellings, in canonical order
    pub const NAMES: [&'static str; 3] = ["propagate", "raise", "omit"];

    /// Canonical spelling
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Propagate => "propagate",
            Self::Raise => "raise",
            Self::Omit => "omit",
        }
    }
}

impl fmt::Display for NanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NanPolicy {
    type Err = CarrackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "propagate" => Ok(Self::Propagate),
            "raise" => Ok(Self::Raise),
            "omit" => Ok(Self::Omit),
            other => Err(CarrackError::invalid_nan_policy(other)),
        }
    }
}

/// Outcome of [`contains_nan`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NanCheck {
    /// Whether a nan was found
    pub contains_nan: bool,
    /// Policy to apply from here on
    pub policy: NanPolicy,
    /// The element type could not be tested and `omit` replaced the request
    pub substituted: bool,
}

/// Look for nans in `a` under `policy`
///
/// Integer and bool arrays never contain nan. Complex values are nan when
/// either component is. Element types without a numeric interpretation
/// cannot be tested: a warning is logged and the policy becomes `omit`.
///
/// Fails with `NanPresent` when `policy` is `raise` and a nan was found.
pub fn contains_nan(a: &HostArray, policy: NanPolicy) -> Result<NanCheck> {
    if !a.dtype().supports_nan_check() {
        tracing::warn!(
            dtype = %a.dtype(),
            requested = %policy,
            "the input array could not be properly checked for nan values; nan values will be ignored"
        );
        return Ok(NanCheck {
            contains_nan: false,
            policy: NanPolicy::Omit,
            substituted: true,
        });
    }

    let found = match a.dtype() {
        ElementType::Float16 | ElementType::Float32 | ElementType::Float64 => {
            a.to_f64_vec()?.iter().any(|v| v.is_nan())
        }
        ElementType::Complex64 => any_nan::<f32>(a.bytes()),
        ElementType::Complex128 => any_nan::<f64>(a.bytes()),
        _ => false,
    };

    if found && policy == NanPolicy::Raise {
        return Err(CarrackError::NanPresent);
    }
    Ok(NanCheck {
        contains_nan: found,
        policy,
        substituted: false,
    })
}

fn any_nan<T: Element + Into<f64>>(bytes: &[u8]) -> bool {
    bytes
        .chunks_exact(T::DTYPE.size_bytes())
        .any(|b| T::read_bytes(b).into().is_nan())
}
