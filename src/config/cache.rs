//! Cache/bus tier configuration types.

use serde::Deserialize;

/// Cache/bus configuration.
///
/// One Redis deployment can serve several independent synchronized networks;
/// the cluster id (on the top-level [`super::Config`]) partitions keys and
/// channels between them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis connection URL.
    pub url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}
