use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::redis::RedisConfig;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local maps. Only valid for a single replica.
    #[default]
    Memory,
    /// Shared Redis instance, addressed by `REDIS_URL`.
    Redis,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// How long an issued installation state stays redeemable.
    ///
    /// Default: `10m`
    #[serde(with = "humantime_serde")]
    pub state_ttl: Duration,

    /// How long a webhook delivery id is remembered for deduplication.
    ///
    /// Default: `24h`
    #[serde(with = "humantime_serde")]
    pub delivery_ttl: Duration,

    pub redis: RedisConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            state_ttl: Duration::from_secs(600),
            delivery_ttl: Duration::from_secs(24 * 3600),
            redis: RedisConfig::default(),
        }
    }
}
