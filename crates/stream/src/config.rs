//! Stream cache configuration

use std::time::Duration;

use relay_events::StreamConfig;
use serde::{Deserialize, Serialize};

/// Settings for the per-node stream cache and its background tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamCacheConfig {
    /// Period of the miniblock production tick
    #[serde(with = "humantime_serde")]
    pub miniblock_interval: Duration,

    /// Idle time after which an unsubscribed stream is unloaded
    #[serde(with = "humantime_serde")]
    pub cache_expiration: Duration,

    /// Period of the cache cleanup pass
    #[serde(with = "humantime_serde")]
    pub cache_cleanup_interval: Duration,

    /// Blocks read before the latest snapshot when loading from storage
    pub max_generations_back: u64,

    /// Snapshot and retention policy
    pub stream: StreamConfig,
}

impl Default for StreamCacheConfig {
    fn default() -> Self {
        Self {
            miniblock_interval: Duration::from_secs(2),
            cache_expiration: Duration::from_secs(5 * 60),
            cache_cleanup_interval: Duration::from_secs(60),
            max_generations_back: 0,
            stream: StreamConfig::default(),
        }
    }
}
