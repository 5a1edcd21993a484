use std::time::Duration;

use serde::Deserialize;

/// Fine-tuning for staleness-triggered background refresh.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Duration since the last successful fetch after which entries count as stale.
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(10),
        }
    }
}
