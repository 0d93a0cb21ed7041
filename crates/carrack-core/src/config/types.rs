//! Configuration types

use super::CarrackConfig;
use crate::{CarrackError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Environment variables understood by `Config::merge_with_env`
const ENV_KEYS: &[(&str, &str)] = &[
    ("CARRACK_DEVICE_COUNT", "runtime.device_count"),
    ("CARRACK_DEVICE_MEMORY", "runtime.memory_per_device"),
    ("CARRACK_COLLECTIVE", "runtime.collective_available"),
    ("CARRACK_BACKEND", "transfer.backend"),
    ("CARRACK_LOG", "logging.level"),
];

/// Which communicator backend a registry should use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Collective backend when available, local copies otherwise
    #[default]
    Auto,
    /// Require the collective backend
    Collective,
    /// Always use plain device-to-device copies
    Local,
}

impl FromStr for BackendPreference {
    type Err = CarrackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "collective" => Ok(Self::Collective),
            "local" => Ok(Self::Local),
            other => Err(CarrackError::config(format!(
                "unknown backend '{other}', expected auto, collective or local"
            ))),
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Collective => "collective",
            Self::Local => "local",
        })
    }
}

/// Simulated device runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of devices to bring up
    pub device_count: u32,
    /// Memory pool capacity of each device in bytes
    pub memory_per_device: usize,
    /// Whether the collective communication library exists on this system
    pub collective_available: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device_count: 2,
            memory_per_device: 256 * 1024 * 1024,
            collective_available: true,
        }
    }
}

impl RuntimeConfig {
    /// Configuration for tests: small pools
    pub fn testing(device_count: u32) -> Self {
        Self {
            device_count,
            memory_per_device: 16 * 1024 * 1024,
            collective_available: true,
        }
    }
}

/// Transfer layer settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Communicator backend selection
    pub backend: BackendPreference,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (e.g. `info`, `carrack_transfer=debug`)
    pub level: String,
    /// Include the event target in formatted output
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device runtime section
    pub runtime: RuntimeConfig,
    /// Transfer section
    pub transfer: TransferConfig,
    /// Logging section
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CarrackError::config(format!("invalid value '{value}' for {key}: {e}")))
}

impl CarrackConfig for Config {
    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CarrackError::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    fn merge_with_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if let Some((_, key)) = ENV_KEYS.iter().find(|(env, _)| *env == name) {
                tracing::debug!(variable = %name, key, "configuration override from environment");
                self.set_from_string(key, &value)?;
            }
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.runtime.device_count == 0 {
            return Err(CarrackError::config("runtime.device_count must be greater than 0"));
        }
        if self.runtime.memory_per_device == 0 {
            return Err(CarrackError::config(
                "runtime.memory_per_device must be greater than 0",
            ));
        }
        if self.transfer.backend == BackendPreference::Collective
            && !self.runtime.collective_available
        {
            return Err(CarrackError::config(
                "transfer.backend = collective requires runtime.collective_available",
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(CarrackError::config("logging.level cannot be empty"));
        }
        Ok(())
    }

    fn set_from_string(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "runtime.device_count" => self.runtime.device_count = parse_value(key, value)?,
            "runtime.memory_per_device" => {
                self.runtime.memory_per_device = parse_value(key, value)?;
            }
            "runtime.collective_available" => {
                self.runtime.collective_available = parse_value(key, value)?;
            }
            "transfer.backend" => self.transfer.backend = value.parse()?,
            "logging.level" => self.logging.level = value.trim().to_string(),
            "logging.with_target" => self.logging.with_target = parse_value(key, value)?,
            other => {
                return Err(CarrackError::config(format!("unknown configuration key '{other}'")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_validate() {
        let config = Config::defaults();
        assert!(config.validate().is_ok());
        assert_eq!(config.transfer.backend, BackendPreference::Auto);
    }

    #[test]
    fn test_toml_sections() {
        let config = Config::from_toml_str(
            r#"
            [runtime]
            device_count = 4
            collective_available = false

            [transfer]
            backend = "local"
            "#,
        )
        .unwrap();
        assert_eq!(config.runtime.device_count, 4);
        assert!(!config.runtime.collective_available);
        assert_eq!(config.transfer.backend, BackendPreference::Local);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .merge_with_vars(vars(&[
                ("CARRACK_DEVICE_COUNT", "3"),
                ("CARRACK_BACKEND", "Local"),
                ("UNRELATED", "ignored"),
            ]))
            .unwrap();
        assert_eq!(config.runtime.device_count, 3);
        assert_eq!(config.transfer.backend, BackendPreference::Local);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        assert!(config
            .merge_with_vars(vars(&[("CARRACK_DEVICE_COUNT", "many")]))
            .is_err());
        assert!(config.set_from_string("transfer.backend", "nccl").is_err());
        assert!(config.set_from_string("nope", "1").is_err());
    }

    #[test]
    fn test_collective_requires_availability() {
        let mut config = Config::default();
        config.runtime.collective_available = false;
        config.transfer.backend = BackendPreference::Collective;
        assert!(matches!(config.validate(), Err(CarrackError::Config { .. })));
    }
}
