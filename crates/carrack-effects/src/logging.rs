//! Tracing subscriber setup

use carrack_core::{CarrackError, LoggingConfig, Result};
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` wins, otherwise the configured level
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| {
        CarrackError::config(format!("invalid log filter '{}': {e}", config.level))
    })
}

/// Install a formatted subscriber for the process
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(level = %config.level, "logging initialized");
    }
    Ok(())
}
