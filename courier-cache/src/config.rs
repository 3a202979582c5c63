use std::time::Duration;

use serde::Deserialize;

const fn default_shards() -> usize {
    1024
}

const fn default_life_window_secs() -> u64 {
    600
}

const fn default_clean_window_secs() -> u64 {
    300
}

const fn default_max_entry_size() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Number of internal shards. Rounded up to a power of two.
    ///
    /// Default: 1024
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// How long an entry stays valid after insertion (in seconds)
    ///
    /// Default: 600 (10 minutes)
    #[serde(default = "default_life_window_secs")]
    pub life_window_secs: u64,

    /// Interval between sweeps of expired entries (in seconds)
    ///
    /// Default: 300 (5 minutes)
    #[serde(default = "default_clean_window_secs")]
    pub clean_window_secs: u64,

    /// Largest attachment that will be fetched (in bytes)
    ///
    /// Default: 10 MiB
    #[serde(default = "default_max_entry_size")]
    pub max_entry_size: u64,

    /// Ceiling on the total cached bytes; 0 disables it
    #[serde(default)]
    pub hard_max_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            life_window_secs: default_life_window_secs(),
            clean_window_secs: default_clean_window_secs(),
            max_entry_size: default_max_entry_size(),
            hard_max_size: 0,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn life_window(&self) -> Duration {
        Duration::from_secs(self.life_window_secs)
    }

    /// Never zero, so it is always usable as a timer period.
    #[must_use]
    pub fn clean_window(&self) -> Duration {
        Duration::from_secs(self.clean_window_secs.max(1))
    }

    /// Shard count accepted by the underlying map: a power of two, at least 2.
    #[must_use]
    pub const fn shard_amount(&self) -> usize {
        let shards = if self.shards < 2 { 2 } else { self.shards };
        shards.next_power_of_two()
    }
}

/// Where attachments are stored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,

    /// Falls back to the AWS environment/profile chain when unset.
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack, ...)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Address buckets by path instead of by subdomain
    #[serde(default)]
    pub path_style: bool,
}
