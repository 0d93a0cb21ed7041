//! Carrack configuration
//!
//! Configuration is loaded from TOML and then overridden by environment
//! variables with the `CARRACK_` prefix.

pub mod traits;
pub mod types;

pub use traits::CarrackConfig;
pub use types::{BackendPreference, Config, LoggingConfig, RuntimeConfig, TransferConfig};
