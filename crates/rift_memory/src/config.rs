//! Memory configuration - capacities for the builtin allocators
//!
//! ```toml
//! linear_capacity = 1048576   # 1MB
//! pool_block_size = 64
//! pool_block_count = 1024
//! stack_capacity = 1048576
//! ```
//!
//! Every field is optional; missing fields keep their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::DEFAULT_ALIGNMENT;

/// Capacities (in bytes) used by `MemoryManager::initialize`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Linear allocator buffer size
    pub linear_capacity: usize,
    /// Size of each pool block
    pub pool_block_size: usize,
    /// Number of pool blocks
    pub pool_block_count: usize,
    /// Stack allocator buffer size
    pub stack_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            linear_capacity: 1024 * 1024,
            pool_block_size: 64,
            pool_block_count: 1024,
            stack_capacity: 1024 * 1024,
        }
    }
}

impl MemoryConfig {
    /// Parse and validate a config from TOML
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check that every allocator can be built from these values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("linear_capacity", self.linear_capacity),
            ("pool_block_count", self.pool_block_count),
            ("stack_capacity", self.stack_capacity),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
            }
        }

        if self.pool_block_size < DEFAULT_ALIGNMENT {
            return Err(ConfigError::Invalid(format!(
                "pool_block_size must be at least {} bytes",
                DEFAULT_ALIGNMENT
            )));
        }

        if self.pool_block_size.checked_mul(self.pool_block_count).is_none() {
            return Err(ConfigError::Invalid("pool size overflows".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(MemoryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = MemoryConfig::from_toml_str("pool_block_size = 128\nstack_capacity = 4096\n").unwrap();

        assert_eq!(config.pool_block_size, 128);
        assert_eq!(config.stack_capacity, 4096);
        assert_eq!(config.linear_capacity, MemoryConfig::default().linear_capacity);
    }

    #[test]
    fn test_invalid_values() {
        let err = MemoryConfig::from_toml_str("linear_capacity = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = MemoryConfig::from_toml_str("pool_block_size = 2").unwrap_err();
        assert!(err.to_string().contains("pool_block_size"));
    }

    #[test]
    fn test_parse_error() {
        let err = MemoryConfig::from_toml_str("stack_capacity = \"big\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = MemoryConfig::load("/nonexistent/rift_memory.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
