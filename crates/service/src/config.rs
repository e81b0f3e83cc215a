//! Service and node configuration

use std::path::Path;
use std::time::Duration;

use relay_stream::StreamCacheConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for the RPC layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Capacity of the channel every sync session funnels its results
    /// through. A session that fills it is torn down.
    pub sync_channel_capacity: usize,

    /// Deadline for a single forwarded or replicated call to a peer
    #[serde(with = "humantime_serde")]
    pub forward_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            sync_channel_capacity: 256,
            forward_timeout: Duration::from_secs(30),
        }
    }
}

/// Everything a relay node reads from its config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub cache: StreamCacheConfig,
    pub service: ServiceConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text; absent keys take their defaults
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.sync_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "service.sync_channel_capacity must be positive".to_string(),
            ));
        }
        if self.cache.miniblock_interval.is_zero() || self.cache.cache_cleanup_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "cache intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
