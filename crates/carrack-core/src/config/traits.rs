//! Core configuration traits

use crate::Result;
use std::path::Path;

/// Core trait for Carrack configuration types
pub trait CarrackConfig: Clone + Default + Send + Sync + 'static {
    /// Get default configuration values
    fn defaults() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> Result<Self>;

    /// Merge with `CARRACK_*` environment variables
    fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Merge with an explicit set of `(name, value)` variables
    fn merge_with_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>;

    /// Validate the configuration
    fn validate(&self) -> Result<()>;

    /// Set a configuration value from a dotted key (e.g. `runtime.device_count`)
    fn set_from_string(&mut self, key: &str, value: &str) -> Result<()>;
}
