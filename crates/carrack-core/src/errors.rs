//! Unified error system for Carrack
//!
//! A single error enum covers the device runtime, the communicator backends,
//! the transfer engine and the statistics helpers. Every failure propagates
//! to the immediate caller; nothing here is retried.

use crate::types::{DeviceId, ElementType};
use serde::{Deserialize, Serialize};

/// Unified error type for all Carrack operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum CarrackError {
    /// Communicator registry construction failed
    #[error("Communicator initialization failed: {message}")]
    CommunicationInit {
        /// Why the registry could not be built
        message: String,
    },

    /// Device memory allocation failed
    #[error("Out of memory on {device}: requested {requested} bytes, {available} bytes available")]
    OutOfMemory {
        /// Device whose pool was exhausted
        device: DeviceId,
        /// Bytes requested by the failing allocation
        requested: usize,
        /// Bytes still available in the pool
        available: usize,
    },

    /// A send/receive pair failed
    #[error("Transfer failed: {message}")]
    Transfer {
        /// Error message from the communication layer
        message: String,
    },

    /// Unrecognized nan policy string
    #[error("nan_policy must be one of {{'propagate', 'raise', 'omit'}}, got '{policy}'")]
    InvalidNanPolicy {
        /// The rejected policy
        policy: String,
    },

    /// An exported buffer was consumed more than once
    #[error("Ownership violation: {message}")]
    OwnershipViolation {
        /// Description of the violation
        message: String,
    },

    /// Element type not supported by the requested operation
    #[error("Unsupported element type {dtype} for {operation}")]
    UnsupportedElementType {
        /// Offending element type
        dtype: ElementType,
        /// Operation that rejected it
        operation: String,
    },

    /// Nan values found under the `raise` policy
    #[error("The input contains nan values")]
    NanPresent,

    /// Invalid input, shape, region or precondition
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Configuration could not be loaded or validated
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Internal runtime error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl CarrackError {
    /// Create a communicator initialization error
    pub fn communication_init(message: impl Into<String>) -> Self {
        Self::CommunicationInit {
            message: message.into(),
        }
    }

    /// Create an out of memory error
    pub fn out_of_memory(device: DeviceId, requested: usize, available: usize) -> Self {
        Self::OutOfMemory {
            device,
            requested,
            available,
        }
    }

    /// Create a transfer error
    pub fn transfer(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
        }
    }

    /// Create an invalid nan policy error
    pub fn invalid_nan_policy(policy: impl Into<String>) -> Self {
        Self::InvalidNanPolicy {
            policy: policy.into(),
        }
    }

    /// Create an ownership violation error
    pub fn ownership_violation(message: impl Into<String>) -> Self {
        Self::OwnershipViolation {
            message: message.into(),
        }
    }

    /// Create an unsupported element type error
    pub fn unsupported_dtype(dtype: ElementType, operation: impl Into<String>) -> Self {
        Self::UnsupportedElementType {
            dtype,
            operation: operation.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error came from the communication layer
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::CommunicationInit { .. } | Self::Transfer { .. })
    }
}

/// Standard Result type for Carrack operations
pub type Result<T> = std::result::Result<T, CarrackError>;

impl From<std::io::Error> for CarrackError {
    fn from(err: std::io::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::de::Error> for CarrackError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(format!("Invalid TOML: {err}"))
    }
}
